//a slot in the ring buffer containing data and its epoch
struct Slot<T> {
    data: Option<T>,
    epoch: u64,  //epoch when this slot was last written
}

//bounded ring buffer with per-slot epochs
//freshness bias: a push into a full buffer discards the oldest item
pub struct RingBuffer<T> {
    buffer: Vec<Slot<T>>,
    head: usize,
    tail: usize,
    len: usize,
    write_epoch: u64, //writer's current epoch (inc on push)
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be greater than 0");

        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(Slot { data: None, epoch: 0 });
        }

        RingBuffer {
            buffer,
            head: 0,
            tail: 0,
            len: 0,
            write_epoch: 0,
        }
    }

    //push item to buffer
    //return the epoch num. of the push
    pub fn push(&mut self, item: T) -> u64 {
        if self.is_full() {
            //discard oldest
            self.tail = (self.tail + 1) % self.capacity();
            self.len -= 1;
        }

        self.write_epoch += 1;

        let slot = &mut self.buffer[self.head];
        slot.data = Some(item);
        slot.epoch = self.write_epoch;

        self.head = (self.head + 1) % self.capacity();
        self.len += 1;

        self.write_epoch
    }

    //pop the oldest item from buffer
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let slot = &self.buffer[self.tail];
        let item = slot.data.clone();

        self.tail = (self.tail + 1) % self.capacity();
        self.len -= 1;

        item
    }

    //latest item with its epoch, survives pops so it doubles as a snapshot
    pub fn peek_latest(&self) -> Option<(T, u64)> {
        self.latest_slot()
            .and_then(|slot| slot.data.clone().map(|d| (d, slot.epoch)))
    }

    fn latest_slot(&self) -> Option<&Slot<T>> {
        if self.write_epoch == 0 {
            return None;
        }
        let latest_idx = (self.head + self.capacity() - 1) % self.capacity();
        Some(&self.buffer[latest_idx])
    }

    pub fn latest_epoch(&self) -> u64 {
        self.write_epoch
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}
