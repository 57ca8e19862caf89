//! Ordered skip list over (score, user id)
//!
//! Probabilistic skip list ranking the highest score first, ties broken by
//! ascending user id, so the resulting order is deterministic for a given set
//! of users and scores regardless of insertion order. A side index maps user
//! id to node for O(1) lookup and O(log n) erase.
//!
//! Nodes live in a slab with an explicit free list; towers are `u32` slot
//! indices with a NIL sentinel. Slot 0 is the header sentinel and holds a
//! full-height tower.

use ahash::AHashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

const NIL: u32 = u32::MAX;
const HEADER: u32 = 0;
const MAX_SUPPORTED_LEVELS: usize = 32;

#[derive(Debug)]
struct Node {
    user_id: String,
    score: f64,
    last_update: i64,
    /// Forward pointers, one per occupied level
    forward: Vec<u32>,
}

impl Node {
    fn vacant() -> Self {
        Self {
            user_id: String::new(),
            score: 0.0,
            last_update: 0,
            forward: Vec::new(),
        }
    }
}

/// Borrowed view of one entry, in ranking order fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryRef<'a> {
    pub user_id: &'a str,
    pub score: f64,
    pub last_update: i64,
}

#[derive(Debug)]
pub struct SkipList {
    slots: Vec<Node>,
    free: Vec<u32>,
    index: AHashMap<String, u32>,
    max_level: usize,
    probability: f64,
    current_level: usize,
    len: usize,
    rng: SmallRng,
}

impl SkipList {
    /// `max_level` must be in `[1, 32]`, `probability` strictly inside (0, 1).
    pub fn new(max_level: usize, probability: f64) -> Result<Self> {
        if max_level == 0 || max_level > MAX_SUPPORTED_LEVELS {
            return Err(Error::InvalidMaxLevel(max_level));
        }
        if !(probability > 0.0 && probability < 1.0) {
            return Err(Error::InvalidProbability(probability));
        }
        let header = Node {
            user_id: String::new(),
            score: 0.0,
            last_update: 0,
            forward: vec![NIL; max_level],
        };
        Ok(Self {
            slots: vec![header],
            free: Vec::new(),
            index: AHashMap::new(),
            max_level,
            probability,
            current_level: 1,
            len: 0,
            rng: SmallRng::from_entropy(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < self.max_level && self.rng.gen::<f64>() < self.probability {
            level += 1;
        }
        level
    }

    /// True when the node at `idx` ranks strictly before `(score, user_id)`.
    #[inline]
    fn comes_before(&self, idx: u32, score: f64, user_id: &str) -> bool {
        let node = &self.slots[idx as usize];
        node.score > score || (node.score == score && node.user_id.as_str() < user_id)
    }

    /// Predecessors of `(score, user_id)` at every level of the list.
    fn find_update(&self, score: f64, user_id: &str, skip: u32) -> Vec<u32> {
        let mut update = vec![HEADER; self.max_level];
        let mut cursor = HEADER;
        for level in (0..self.current_level).rev() {
            loop {
                let next = self.slots[cursor as usize].forward[level];
                if next != NIL && next != skip && self.comes_before(next, score, user_id) {
                    cursor = next;
                } else {
                    break;
                }
            }
            update[level] = cursor;
        }
        update
    }

    fn alloc(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = node;
                idx
            }
            None => {
                self.slots.push(node);
                (self.slots.len() - 1) as u32
            }
        }
    }

    /// Insert or replace `user_id`. A present user is erased first so the
    /// node lands at its new rank.
    pub fn upsert(&mut self, user_id: &str, score: f64, last_update: i64) {
        self.erase(user_id);

        let node_level = self.random_level();
        let mut update = self.find_update(score, user_id, NIL);
        if node_level > self.current_level {
            for slot in update
                .iter_mut()
                .take(node_level)
                .skip(self.current_level)
            {
                *slot = HEADER;
            }
            self.current_level = node_level;
        }

        let idx = self.alloc(Node {
            user_id: user_id.to_string(),
            score,
            last_update,
            forward: vec![NIL; node_level],
        });
        for (level, &prev) in update.iter().enumerate().take(node_level) {
            let next = self.slots[prev as usize].forward[level];
            self.slots[idx as usize].forward[level] = next;
            self.slots[prev as usize].forward[level] = idx;
        }

        self.index.insert(user_id.to_string(), idx);
        self.len += 1;
    }

    /// Remove `user_id`; true when it was present.
    pub fn erase(&mut self, user_id: &str) -> bool {
        let Some(&target) = self.index.get(user_id) else {
            return false;
        };
        let score = self.slots[target as usize].score;
        let update = self.find_update(score, user_id, target);

        let tower = self.slots[target as usize].forward.len();
        for (level, &prev) in update.iter().enumerate().take(tower) {
            if self.slots[prev as usize].forward[level] == target {
                let next = self.slots[target as usize].forward[level];
                self.slots[prev as usize].forward[level] = next;
            }
        }

        while self.current_level > 1
            && self.slots[HEADER as usize].forward[self.current_level - 1] == NIL
        {
            self.current_level -= 1;
        }

        self.index.remove(user_id);
        self.len -= 1;
        self.slots[target as usize] = Node::vacant();
        self.free.push(target);
        true
    }

    /// O(1) lookup through the side index.
    pub fn get(&self, user_id: &str) -> Option<EntryRef<'_>> {
        let &idx = self.index.get(user_id)?;
        let node = &self.slots[idx as usize];
        Some(EntryRef {
            user_id: &node.user_id,
            score: node.score,
            last_update: node.last_update,
        })
    }

    /// Entries in rank order, best first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.slots[HEADER as usize].forward[0],
        }
    }

    /// Up to `k` best-ranked entries.
    pub fn top_k(&self, k: usize) -> Vec<EntryRef<'_>> {
        self.iter().take(k).collect()
    }

    /// 1-based position of `user_id`, walking level 0.
    pub fn rank_of(&self, user_id: &str) -> Option<usize> {
        if !self.index.contains_key(user_id) {
            return None;
        }
        self.iter()
            .position(|entry| entry.user_id == user_id)
            .map(|pos| pos + 1)
    }

    /// Lowest-ranked entry.
    pub fn tail(&self) -> Option<EntryRef<'_>> {
        self.iter().last()
    }

    /// Drop every entry, keeping the configured geometry.
    pub fn clear(&mut self) {
        self.slots.truncate(1);
        self.slots[HEADER as usize].forward = vec![NIL; self.max_level];
        self.free.clear();
        self.index.clear();
        self.current_level = 1;
        self.len = 0;
    }
}

pub struct Iter<'a> {
    list: &'a SkipList,
    cursor: u32,
}

impl<'a> Iterator for Iter<'a> {
    type Item = EntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = &self.list.slots[self.cursor as usize];
        self.cursor = node.forward[0];
        Some(EntryRef {
            user_id: &node.user_id,
            score: node.score,
            last_update: node.last_update,
        })
    }
}
