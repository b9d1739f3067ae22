//! In-process topics between the link thread, the control timer and the
//! operator side. A topic is a bounded queue that also keeps its newest value
//! as a snapshot, so slow readers lose old messages, never the latest one.

pub mod topic;
pub mod subscriber;
pub mod registry;

pub use topic::Topic;
pub use subscriber::Subscriber;
pub use registry::TopicRegistry;

/// Anything that can be published: cloned to each reader, moved across threads.
pub trait Message: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Message for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    //lat and lon always written together; a torn read would break lat == -lon
    #[derive(Clone, Copy, Debug, Default)]
    struct Fix {
        lat: f64,
        lon: f64,
        seq: u32,
    }

    #[test]
    fn test_snapshots_are_never_torn() {
        let topic = Arc::new(Topic::<Fix>::new("/vehicle/state", 4));
        let writer_topic = Arc::clone(&topic);
        let done = Arc::new(AtomicBool::new(false));
        let writer_done = Arc::clone(&done);

        let writer = thread::spawn(move || {
            for seq in 1..=5000u32 {
                let v = seq as f64 * 1e-6;
                writer_topic.publish(Fix { lat: v, lon: -v, seq });
            }
            writer_done.store(true, Ordering::SeqCst);
        });

        let reader = Subscriber::new(Arc::clone(&topic));
        let mut last_seq = 0;
        while !done.load(Ordering::SeqCst) {
            if let Some(fix) = reader.latest_if_new() {
                assert_eq!(fix.lat, -fix.lon);
                assert!(fix.seq > last_seq);
                last_seq = fix.seq;
            }
            thread::yield_now();
        }
        writer.join().unwrap();

        //queue overflowed long ago, the snapshot still holds the final fix
        let (latest, epoch) = topic.peek_latest().unwrap();
        assert_eq!(latest.seq, 5000);
        assert_eq!(epoch, 5000);
        assert_eq!(topic.len(), 4);
    }
}
