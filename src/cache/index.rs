//! Reverse indexes used by invalidation
//!
//! The index is owned by the cache layer and mutated under the same lock as
//! the memory tier, so a cascade never observes a half-registered entry.

use std::collections::{HashMap, HashSet, VecDeque};

/// What one key registered with the index
#[derive(Debug, Clone, Default)]
struct Links {
    tags: Vec<String>,
    dependencies: Vec<String>,
    events: Vec<String>,
}

/// Tag, dependency and event reverse indexes
#[derive(Debug, Default)]
pub struct InvalidationIndex {
    by_tag: HashMap<String, HashSet<String>>,
    /// dependency key -> keys that depend on it
    dependents: HashMap<String, HashSet<String>>,
    by_event: HashMap<String, HashSet<String>>,
    links: HashMap<String, Links>,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the links of `key`, replacing any earlier registration
    pub fn register(&mut self, key: &str, tags: &[String], dependencies: &[String], events: &[String]) {
        self.unregister(key);

        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        for dependency in dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }
        for event in events {
            self.by_event
                .entry(event.clone())
                .or_default()
                .insert(key.to_string());
        }

        self.links.insert(
            key.to_string(),
            Links {
                tags: tags.to_vec(),
                dependencies: dependencies.to_vec(),
                events: events.to_vec(),
            },
        );
    }

    /// Drops every link of `key`
    ///
    /// Keys that depend on `key` keep their registration; callers cascade
    /// with [`InvalidationIndex::cascade`] first when dependents must go too.
    pub fn unregister(&mut self, key: &str) {
        let Some(links) = self.links.remove(key) else {
            return;
        };

        for tag in &links.tags {
            remove_member(&mut self.by_tag, tag, key);
        }
        for dependency in &links.dependencies {
            remove_member(&mut self.dependents, dependency, key);
        }
        for event in &links.events {
            remove_member(&mut self.by_event, event, key);
        }
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        members(&self.by_tag, tag)
    }

    pub fn keys_for_event(&self, event: &str) -> Vec<String> {
        members(&self.by_event, event)
    }

    /// Direct dependents of `key`
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        members(&self.dependents, key)
    }

    /// The roots plus everything that transitively depends on them
    ///
    /// Each key appears once; dependency cycles terminate.
    pub fn cascade<I>(&self, roots: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = roots.into_iter().collect();

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(dependents) = self.dependents.get(&key) {
                queue.extend(dependents.iter().cloned());
            }
            order.push(key);
        }

        order
    }

    pub fn contains(&self, key: &str) -> bool {
        self.links.contains_key(key)
    }

    /// Number of keys with at least one registered link
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.dependents.clear();
        self.by_event.clear();
        self.links.clear();
    }
}

fn members(map: &HashMap<String, HashSet<String>>, name: &str) -> Vec<String> {
    let mut keys: Vec<String> = map
        .get(name)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

fn remove_member(map: &mut HashMap<String, HashSet<String>>, name: &str, key: &str) {
    if let Some(set) = map.get_mut(name) {
        set.remove(key);
        if set.is_empty() {
            map.remove(name);
        }
    }
}
