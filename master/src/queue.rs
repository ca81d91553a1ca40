// master/src/queue.rs

use std::{cmp::Ordering, collections::BinaryHeap};

/// Entrada del heap: gana la prioridad más alta; a igual prioridad,
/// la que entró antes.
#[derive(Debug)]
struct Entry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cola de máxima prioridad con prioridad explícita por elemento.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    /// Saca el elemento de mayor prioridad junto con su prioridad.
    pub fn pop(&mut self) -> Option<(T, i64)> {
        self.heap.pop().map(|e| (e.item, e.priority))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Quita todas las entradas que cumplan `pred`. Devuelve cuántas.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.heap.len();
        self.heap.retain(|e| !pred(&e.item));
        before - self.heap.len()
    }
}
