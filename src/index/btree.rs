/// A B+-tree mapping ordered keys to a value, used as the per-column
/// index structure.
///
/// Grounded in `lstore/index.py`'s hand-rolled `BPlusTree`/`BPlusTreeNode`:
/// leaves carry the actual values, internal nodes only route. The
/// Python leaves are threaded with a `next` pointer for O(1) step-to-
/// neighbor range scans; a safe-Rust tree without parent pointers can't
/// own that link twice (once from the parent, once from the left
/// sibling), so range/len instead do an explicit in-order descent —
/// the "explicit cursor" alternative the spec calls out in place of
/// the source's generator/linked-list idiom.
#[derive(Debug)]
enum Node<K, V> {
    Leaf { keys: Vec<K>, values: Vec<V> },
    Internal { keys: Vec<K>, children: Vec<Box<Node<K, V>>> },
}

impl<K: Ord + Clone, V: Clone> Node<K, V> {
    fn new_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    fn keys(&self) -> &[K] {
        match self {
            Node::Leaf { keys, .. } => keys,
            Node::Internal { keys, .. } => keys,
        }
    }
}

#[derive(Debug)]
pub struct BPlusTree<K, V> {
    order: usize,
    root: Box<Node<K, V>>,
}

impl<K: Ord + Clone, V: Clone> BPlusTree<K, V> {
    pub fn new(order: usize) -> Self {
        BPlusTree {
            order,
            root: Box::new(Node::new_leaf()),
        }
    }

    fn max_keys(&self) -> usize {
        self.order - 1
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = self.root.as_ref();
        loop {
            match node {
                Node::Internal { keys, children } => {
                    node = children[upper_bound(keys, key)].as_ref();
                }
                Node::Leaf { keys, values } => {
                    return match keys.binary_search(key) {
                        Ok(i) => Some(&values[i]),
                        Err(_) => None,
                    };
                }
            }
        }
    }

    /// All (key, value) pairs with `begin <= key <= end`, in key order.
    pub fn range(&self, begin: &K, end: &K) -> Vec<(K, V)> {
        let mut out = Vec::new();
        collect_range(&self.root, begin, end, &mut out);
        out
    }

    pub fn insert(&mut self, key: K, value: V) {
        let max_keys = self.max_keys();
        if self.root.keys().len() >= max_keys {
            let old_root = std::mem::replace(&mut self.root, Box::new(Node::new_leaf()));
            let mut new_root = Node::Internal {
                keys: Vec::new(),
                children: vec![old_root],
            };
            split_child(&mut new_root, 0);
            self.root = Box::new(new_root);
        }
        insert_non_full(&mut self.root, key, value, self.order);
    }

    /// Bulk-append pairs that are sorted and strictly greater than any
    /// existing key. Returns an error describing the violation so the
    /// caller can fall back to per-entry `insert`, mirroring
    /// `BPlusTree.batch_insert`'s `ValueError` path in the source.
    pub fn batch_insert(&mut self, pairs: &[(K, V)]) -> Result<(), String> {
        if pairs.is_empty() {
            return Ok(());
        }
        if let Some(current_max) = self.max_key() {
            if pairs[0].0 <= current_max {
                return Err("keys to batch insert must be sorted and greater than existing keys"
                    .to_string());
            }
        }
        for (k, v) in pairs {
            self.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    pub fn max_key(&self) -> Option<K> {
        let mut node = self.root.as_ref();
        loop {
            match node {
                Node::Internal { children, .. } => node = children.last()?.as_ref(),
                Node::Leaf { keys, .. } => return keys.last().cloned(),
            }
        }
    }

    pub fn len(&self) -> usize {
        count_leaves(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn count_leaves<K, V>(node: &Node<K, V>) -> usize {
    match node {
        Node::Leaf { keys, .. } => keys.len(),
        Node::Internal { children, .. } => children.iter().map(|c| count_leaves(c)).sum(),
    }
}

fn collect_range<K: Ord + Clone, V: Clone>(
    node: &Node<K, V>,
    begin: &K,
    end: &K,
    out: &mut Vec<(K, V)>,
) {
    match node {
        Node::Leaf { keys, values } => {
            for (k, v) in keys.iter().zip(values.iter()) {
                if k >= begin && k <= end {
                    out.push((k.clone(), v.clone()));
                }
            }
        }
        Node::Internal { keys, children } => {
            for (i, child) in children.iter().enumerate() {
                // A child can hold keys in [keys[i-1], keys[i]); only
                // descend into children whose range can overlap [begin, end].
                let lower_ok = i == 0 || &keys[i - 1] <= end;
                let upper_ok = i == keys.len() || &keys[i] >= begin;
                if lower_ok && upper_ok {
                    collect_range(child, begin, end, out);
                }
            }
        }
    }
}

fn upper_bound<K: Ord>(keys: &[K], key: &K) -> usize {
    match keys.binary_search(key) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

fn insert_non_full<K: Ord + Clone, V: Clone>(node: &mut Node<K, V>, key: K, value: V, order: usize) {
    match node {
        Node::Leaf { keys, values } => match keys.binary_search(&key) {
            Ok(i) => values[i] = value,
            Err(i) => {
                keys.insert(i, key);
                values.insert(i, value);
            }
        },
        Node::Internal { keys, children } => {
            let mut i = upper_bound(keys, &key);
            if children[i].keys().len() >= order - 1 {
                split_child(node, i);
                if let Node::Internal { keys, .. } = node {
                    if key >= keys[i] {
                        i += 1;
                    }
                }
            }
            if let Node::Internal { children, .. } = node {
                insert_non_full(&mut children[i], key, value, order);
            }
        }
    }
}

/// Split `parent.children[index]` in place, pushing the split key (or
/// promoted median) up into `parent`. Mirrors `BPlusTree.split_child`.
fn split_child<K: Ord + Clone, V: Clone>(parent: &mut Node<K, V>, index: usize) {
    let children = match parent {
        Node::Internal { children, .. } => children,
        Node::Leaf { .. } => unreachable!("split_child called on a leaf parent"),
    };
    let (split_key, new_node) = match children[index].as_mut() {
        Node::Leaf { keys, values } => {
            let mid = keys.len() / 2;
            let new_keys = keys.split_off(mid);
            let new_values = values.split_off(mid);
            let split_key = new_keys[0].clone();
            (
                split_key,
                Node::Leaf {
                    keys: new_keys,
                    values: new_values,
                },
            )
        }
        Node::Internal { keys, children } => {
            let mid = keys.len() / 2;
            let split_key = keys[mid].clone();
            let new_keys = keys.split_off(mid + 1);
            keys.pop();
            let new_children = children.split_off(mid + 1);
            (
                split_key,
                Node::Internal {
                    keys: new_keys,
                    children: new_children,
                },
            )
        }
    };
    if let Node::Internal { keys, children } = parent {
        keys.insert(index, split_key);
        children.insert(index + 1, Box::new(new_node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_point_lookup() {
        let mut tree: BPlusTree<i64, Vec<String>> = BPlusTree::new(4);
        for i in 0..50i64 {
            tree.insert(i, vec![format!("b{}", i)]);
        }
        assert_eq!(tree.get(&10), Some(&vec!["b10".to_string()]));
        assert_eq!(tree.get(&49), Some(&vec!["b49".to_string()]));
        assert_eq!(tree.get(&999), None);
    }

    #[test]
    fn range_scan_returns_ordered_window() {
        let mut tree: BPlusTree<i64, Vec<String>> = BPlusTree::new(4);
        for i in 0..30i64 {
            tree.insert(i, vec![format!("b{}", i)]);
        }
        let mut window = tree.range(&10, &15);
        window.sort_by_key(|(k, _)| *k);
        let keys: Vec<i64> = window.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn batch_insert_rejects_out_of_order_pairs() {
        let mut tree: BPlusTree<i64, Vec<String>> = BPlusTree::new(4);
        tree.insert(5, vec!["b5".to_string()]);
        let err = tree.batch_insert(&[(3, vec!["b3".to_string()])]);
        assert!(err.is_err());
    }

    #[test]
    fn batch_insert_accepts_sorted_tail() {
        let mut tree: BPlusTree<i64, Vec<String>> = BPlusTree::new(4);
        tree.insert(1, vec!["b1".to_string()]);
        tree.batch_insert(&[
            (2, vec!["b2".to_string()]),
            (3, vec!["b3".to_string()]),
            (4, vec!["b4".to_string()]),
        ])
        .unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.max_key(), Some(4));
    }
}
