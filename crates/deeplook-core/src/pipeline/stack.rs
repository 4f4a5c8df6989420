//! LIFO stack of fixed-size work chunks.

/// A contiguous slice of the input, remembered by where it started.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Index of `items[0]` among everything pushed onto the stack.
    pub offset: usize,
    pub items: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct ChunkStack<T> {
    chunks: Vec<Chunk<T>>,
    pushed: usize,
}

impl<T> Default for ChunkStack<T> {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            pushed: 0,
        }
    }
}

impl<T> ChunkStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `items` into chunks of `chunk_size` (the last may be shorter)
    /// and push them in order. A zero size is treated as 1.
    pub fn from_items(items: Vec<T>, chunk_size: usize) -> Self {
        let mut stack = Self::new();
        for chunk in chunked(items, chunk_size) {
            stack.push(chunk);
        }
        stack
    }

    /// Push a chunk; empty chunks are ignored.
    pub fn push(&mut self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let offset = self.pushed;
        self.pushed += items.len();
        self.chunks.push(Chunk { offset, items });
    }

    pub fn pop(&mut self) -> Option<Chunk<T>> {
        self.chunks.pop()
    }

    pub fn peek(&self) -> Option<&Chunk<T>> {
        self.chunks.last()
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of items across all chunks still on the stack.
    pub fn item_count(&self) -> usize {
        self.chunks.iter().map(|c| c.items.len()).sum()
    }

    /// Every item still on the stack, in push order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flat_map(|c| c.items.iter())
    }
}

/// Split `items` into consecutive runs of at most `size` items.
pub fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            out.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
