use snip_core::codec::encode_url_code;
use snip_core::error::Result;
use snip_core::{Deadline, UrlRecord};
use std::collections::HashMap;

/// In-memory URL indexes shared by the memory and file backends.
///
/// Records live in an arena and every index stores arena slots, so flipping
/// `deleted` on a slot is observed through all lookups at once.
#[derive(Debug, Default)]
pub(crate) struct UrlIndex {
    records: Vec<UrlRecord>,
    by_url: HashMap<String, usize>,
    by_code: HashMap<String, usize>,
    by_owner: HashMap<i64, Vec<usize>>,
    last_id: i64,
}

/// Outcome of staging a batch against the index.
#[derive(Debug, Default)]
pub(crate) struct StagedBatch {
    /// Every requested URL, existing or new.
    pub found: HashMap<String, UrlRecord>,
    /// Records that do not exist yet, in id order.
    pub fresh: Vec<UrlRecord>,
}

impl UrlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an index from replayed records. Later records with an already
    /// seen short code replace the earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = UrlRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.load(record);
        }
        index
    }

    fn load(&mut self, record: UrlRecord) {
        self.last_id = self.last_id.max(record.id);

        let Some(&slot) = self.by_code.get(&record.short_code) else {
            self.push(record);
            return;
        };

        let previous = std::mem::replace(&mut self.records[slot], record);
        let current = &self.records[slot];
        if previous.original_url != current.original_url {
            self.by_url.remove(&previous.original_url);
            self.by_url.insert(current.original_url.clone(), slot);
        }
        if previous.owner_user_id != current.owner_user_id {
            if let Some(slots) = self.by_owner.get_mut(&previous.owner_user_id) {
                slots.retain(|s| *s != slot);
            }
            self.by_owner
                .entry(current.owner_user_id)
                .or_default()
                .push(slot);
        }
    }

    fn push(&mut self, record: UrlRecord) {
        let slot = self.records.len();
        self.by_url.insert(record.original_url.clone(), slot);
        self.by_code.insert(record.short_code.clone(), slot);
        self.by_owner
            .entry(record.owner_user_id)
            .or_default()
            .push(slot);
        self.records.push(record);
    }

    pub fn get_by_url(&self, original_url: &str) -> Option<&UrlRecord> {
        self.by_url.get(original_url).map(|&slot| &self.records[slot])
    }

    pub fn get_by_code(&self, short_code: &str) -> Option<&UrlRecord> {
        self.by_code.get(short_code).map(|&slot| &self.records[slot])
    }

    /// Resolves the batch without touching the index or the sequence.
    ///
    /// Ids for new records are taken from the sequence in order but only
    /// become allocated once the batch is passed to [`UrlIndex::commit`].
    pub fn stage<S: AsRef<str>>(
        &self,
        deadline: Deadline,
        original_urls: &[S],
        owner: i64,
    ) -> Result<StagedBatch> {
        let mut staged = StagedBatch::default();

        for url in original_urls {
            deadline.check("write_urls")?;
            let url = url.as_ref();

            if staged.found.contains_key(url) {
                continue;
            }
            if let Some(existing) = self.get_by_url(url) {
                staged.found.insert(url.to_string(), existing.clone());
                continue;
            }

            let id = self.last_id + staged.fresh.len() as i64 + 1;
            let record = UrlRecord {
                id,
                short_code: encode_url_code(id)?,
                original_url: url.to_string(),
                owner_user_id: owner,
                deleted: false,
            };
            staged.found.insert(url.to_string(), record.clone());
            staged.fresh.push(record);
        }

        Ok(staged)
    }

    pub fn commit(&mut self, fresh: Vec<UrlRecord>) {
        for record in fresh {
            self.last_id = self.last_id.max(record.id);
            self.push(record);
        }
    }

    pub fn owned_by(&self, owner: i64) -> Vec<UrlRecord> {
        self.by_owner
            .get(&owner)
            .map(|slots| slots.iter().map(|&s| self.records[s].clone()).collect())
            .unwrap_or_default()
    }

    /// Looks up each known code once, ignoring unknown ones.
    pub fn resolve<S: AsRef<str>>(&self, short_codes: &[S]) -> Vec<UrlRecord> {
        let mut seen = Vec::new();
        for code in short_codes {
            if let Some(&slot) = self.by_code.get(code.as_ref()) {
                if !seen.contains(&slot) {
                    seen.push(slot);
                }
            }
        }
        seen.into_iter().map(|s| self.records[s].clone()).collect()
    }

    /// Flags the matching live records as deleted and returns their slots.
    pub fn mark_deleted<S: AsRef<str>>(&mut self, short_codes: &[S]) -> Vec<usize> {
        let mut flipped = Vec::new();
        for code in short_codes {
            if let Some(&slot) = self.by_code.get(code.as_ref()) {
                let record = &mut self.records[slot];
                if !record.deleted {
                    record.deleted = true;
                    flipped.push(slot);
                }
            }
        }
        flipped
    }

    /// Reverts [`UrlIndex::mark_deleted`] when its change could not be persisted.
    pub fn unmark_deleted(&mut self, slots: &[usize]) {
        for &slot in slots {
            self.records[slot].deleted = false;
        }
    }

    /// Number of distinct original URLs.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    pub fn last_id(&self) -> i64 {
        self.last_id
    }
}
