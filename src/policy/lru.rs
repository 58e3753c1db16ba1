use super::Policy;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used end
const TAIL: usize = 1; // least-recently-used end
const NULL: usize = usize::MAX;

struct LruNode<T> {
    /// `None` for the HEAD and TAIL sentinels and for freed slots.
    item: Option<T>,
    weight: u64,
    /// Index toward HEAD (more recently used).
    prev: usize,
    /// Index toward TAIL (less recently used).
    next: usize,
}

/// O(1) weight-bounded LRU backed by an index-arena doubly-linked list.
///
/// The policy does not know keys.  `on_insert` returns the node index, which
/// the caller keeps next to the item and passes back to touch or remove it.
pub struct LruPolicy<T> {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<LruNode<T>>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    total_weight: u64,
    max_weight: u64,
}

impl<T: Send> LruPolicy<T> {
    /// Creates a new `LruPolicy` with the given maximum total weight.
    pub fn new(max_weight: u64) -> Self {
        let mut nodes: Vec<LruNode<T>> = Vec::with_capacity(16);
        // HEAD sentinel (index 0): next points to TAIL initially
        nodes.push(LruNode {
            item: None,
            weight: 0,
            prev: NULL,
            next: TAIL,
        });
        // TAIL sentinel (index 1): prev points to HEAD initially
        nodes.push(LruNode {
            item: None,
            weight: 0,
            prev: HEAD,
            next: NULL,
        });

        LruPolicy {
            nodes,
            free_list: Vec::new(),
            total_weight: 0,
            max_weight,
        }
    }

    /// Links `idx` immediately after the HEAD sentinel (marks it most-recently-used).
    fn link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].next;
        self.nodes[idx].prev = HEAD;
        self.nodes[idx].next = old_first;
        self.nodes[HEAD].next = idx;
        self.nodes[old_first].prev = idx;
    }

    /// Detaches `idx` from its current position in the list.
    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NULL;
        self.nodes[idx].next = NULL;
    }

    /// Allocates a new node (reusing from the free list when available).
    fn alloc_node(&mut self, item: T, weight: u64) -> usize {
        let node = LruNode {
            item: Some(item),
            weight,
            prev: NULL,
            next: NULL,
        };
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    #[inline]
    fn is_live(&self, idx: usize) -> bool {
        idx > TAIL && idx < self.nodes.len() && self.nodes[idx].item.is_some()
    }
}

impl<T: Send> Policy<T> for LruPolicy<T> {
    fn on_insert(&mut self, item: T, weight: u64) -> usize {
        let idx = self.alloc_node(item, weight);
        self.link_after_head(idx);
        self.total_weight += weight;
        idx
    }

    fn on_access(&mut self, handle: usize) {
        if self.is_live(handle) {
            self.unlink(handle);
            self.link_after_head(handle);
        }
    }

    fn on_remove(&mut self, handle: usize) -> Option<T> {
        if !self.is_live(handle) {
            return None;
        }
        self.unlink(handle);
        let item = self.nodes[handle].item.take()?;
        self.total_weight -= self.nodes[handle].weight;
        self.free_list.push(handle);
        Some(item)
    }

    fn evict(&mut self) -> Option<T> {
        if self.total_weight <= self.max_weight {
            return None;
        }
        let lru_idx = self.nodes[TAIL].prev;
        if lru_idx == HEAD {
            return None; // list is empty
        }
        self.on_remove(lru_idx)
    }

    fn current_weight(&self) -> u64 {
        self.total_weight
    }

    fn max_weight(&self) -> u64 {
        self.max_weight
    }
}
