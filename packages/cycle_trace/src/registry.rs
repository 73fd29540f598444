//! Record registry: the table of call-site identities and their aggregates.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ptr;

use foldhash::fast::RandomState;
use tracing::debug;

use crate::aggregate::pack;
use crate::growth::reserve_one;
use crate::{Callsite, CounterModel, Error, Result, Totals};

const BUFFER_NAME: &str = "record table";

/// Stable identifier of a record within one profiler.
///
/// Ids are assigned in registration order starting from zero and are never reused.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RecordId(u32);

impl RecordId {
    #[must_use]
    pub(crate) const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The numeric value of the id.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a registered record: its identity and current totals.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordInfo {
    name: Cow<'static, str>,
    file: Cow<'static, str>,
    line: u32,
    totals: Totals,
}

impl RecordInfo {
    /// The name shown for samples of this record in exported traces.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source file the record was registered from.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The source line the record was registered from.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The totals at the time the snapshot was taken.
    #[must_use]
    pub fn totals(&self) -> Totals {
        self.totals
    }
}

#[derive(Debug)]
struct CallsiteRecord<M: CounterModel> {
    name: Cow<'static, str>,
    file: Cow<'static, str>,
    line: u32,
    totals: M::Word,
}

impl<M: CounterModel> CallsiteRecord<M> {
    fn same_identity(&self, other: &Self) -> bool {
        self.line == other.line && self.name == other.name && self.file == other.file
    }

    fn info(&self) -> RecordInfo {
        RecordInfo {
            name: self.name.clone(),
            file: self.file.clone(),
            line: self.line,
            totals: Totals::from_packed(M::load(&self.totals)),
        }
    }
}

/// Owns every record of one profiler.
///
/// Records are only ever appended. Identity is immutable after registration; only the
/// aggregate word changes.
#[derive(Debug)]
pub(crate) struct Registry<M: CounterModel> {
    /// Identity used to claim call-site memos.
    owner: u32,

    records: Vec<CallsiteRecord<M>>,

    /// Call sites (keyed by address) whose memo belongs to a different profiler.
    foreign_sites: HashMap<usize, RecordId, RandomState>,
}

impl<M: CounterModel> Registry<M> {
    pub(crate) fn new(owner: u32) -> Self {
        Self {
            owner,
            records: Vec::new(),
            foreign_sites: HashMap::default(),
        }
    }

    /// Appends a new record. No check is made for an existing record with the same
    /// identity; see [`duplicates()`](Self::duplicates).
    pub(crate) fn register(
        &mut self,
        name: Cow<'static, str>,
        file: Cow<'static, str>,
        line: u32,
    ) -> Result<RecordId> {
        let id = u32::try_from(self.records.len())
            .map(RecordId::new)
            .map_err(|_overflow| Error::IndexSpaceExhausted {
                buffer: BUFFER_NAME,
            })?;

        reserve_one(&mut self.records, BUFFER_NAME)?;

        debug!(record = id.get(), %name, %file, line, "registered record");

        self.records.push(CallsiteRecord {
            name,
            file,
            line,
            totals: M::Word::default(),
        });

        Ok(id)
    }

    /// Resolves a static call site to its record, registering it on first use.
    #[inline]
    pub(crate) fn resolve(&mut self, site: &'static Callsite) -> Result<RecordId> {
        if let Some(id) = site.memoized_for(self.owner) {
            return Ok(id);
        }

        self.resolve_slow(site)
    }

    #[cold]
    fn resolve_slow(&mut self, site: &'static Callsite) -> Result<RecordId> {
        let key = ptr::from_ref(site).addr();

        if let Some(&id) = self.foreign_sites.get(&key) {
            return Ok(id);
        }

        let id = self.register(
            Cow::Borrowed(site.name()),
            Cow::Borrowed(site.file()),
            site.line(),
        )?;

        site.claim(self.owner, id);

        if site.memoized_for(self.owner) != Some(id) {
            self.foreign_sites.insert(key, id);
        }

        Ok(id)
    }

    pub(crate) fn contains(&self, id: RecordId) -> bool {
        id.as_index() < self.records.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Adds a closed span (or a batch of `hits` iterations) to the record's aggregate.
    ///
    /// # Panics
    ///
    /// Panics if the record is not registered.
    #[inline]
    pub(crate) fn fold(&self, id: RecordId, elapsed_cycles: u64, hits: u32) {
        let record = self
            .records
            .get(id.as_index())
            .expect("record ids are validated when the sample is created");

        M::add(&record.totals, pack(hits, elapsed_cycles));
    }

    pub(crate) fn totals(&self, id: RecordId) -> Option<Totals> {
        self.records
            .get(id.as_index())
            .map(|record| Totals::from_packed(M::load(&record.totals)))
    }

    pub(crate) fn take_totals(&self, id: RecordId) -> Option<Totals> {
        self.records
            .get(id.as_index())
            .map(|record| Totals::from_packed(M::take(&record.totals)))
    }

    pub(crate) fn name(&self, id: RecordId) -> Option<&str> {
        self.records.get(id.as_index()).map(|record| &*record.name)
    }

    pub(crate) fn info(&self, id: RecordId) -> Option<RecordInfo> {
        self.records.get(id.as_index()).map(CallsiteRecord::info)
    }

    /// Identity and current totals of every record, in registration order.
    pub(crate) fn infos(&self) -> Vec<(RecordId, RecordInfo)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (index_to_id(index), record.info()))
            .collect()
    }

    pub(crate) fn word(&self, id: RecordId) -> Option<&M::Word> {
        self.records.get(id.as_index()).map(|record| &record.totals)
    }

    pub(crate) fn replace_word(&mut self, id: RecordId, word: M::Word) -> Result<()> {
        let record = self
            .records
            .get_mut(id.as_index())
            .ok_or(Error::UnknownRecord { record: id.get() })?;

        record.totals = word;
        Ok(())
    }

    /// Lists every pair of records sharing the same name, file and line.
    ///
    /// This is a quadratic scan intended for debugging, not for routine use.
    pub(crate) fn duplicates(&self) -> Vec<(RecordId, RecordId)> {
        let mut result = Vec::new();

        for (i, record) in self.records.iter().enumerate() {
            for (j, other) in self.records.iter().enumerate().skip(i.saturating_add(1)) {
                if record.same_identity(other) {
                    result.push((index_to_id(i), index_to_id(j)));
                }
            }
        }

        result
    }
}

fn index_to_id(index: usize) -> RecordId {
    RecordId::new(u32::try_from(index).expect("record count never exceeds u32::MAX"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::callsite::next_owner;
    use crate::{Local, Shared, SharedTotals};

    fn registry() -> Registry<Local> {
        Registry::new(next_owner())
    }

    #[test]
    fn ids_are_assigned_in_order() {
        let mut registry = registry();

        let a = registry.register("a".into(), "a.rs".into(), 1).unwrap();
        let b = registry.register("b".into(), "b.rs".into(), 2).unwrap();

        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dynamic_registration_is_not_deduplicated() {
        let mut registry = registry();

        let a = registry.register("a".into(), "a.rs".into(), 1).unwrap();
        let b = registry.register("a".into(), "a.rs".into(), 1).unwrap();

        assert_ne!(a, b);
        assert_eq!(registry.duplicates(), vec![(a, b)]);
    }

    #[test]
    fn callsite_resolves_to_same_id() {
        static SITE: Callsite = Callsite::new("site", "s.rs", 10);
        let mut registry = registry();

        let first = registry.resolve(&SITE).unwrap();
        let second = registry.resolve(&SITE).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name(first), Some("site"));
    }

    #[test]
    fn callsite_owned_by_other_registry_still_resolves_once() {
        static SITE: Callsite = Callsite::new("shared_site", "s.rs", 20);
        let mut first_registry = registry();
        let mut second_registry = registry();

        // Pad the second registry so the ids differ between the two.
        second_registry
            .register("padding".into(), "p.rs".into(), 1)
            .unwrap();

        let in_first = first_registry.resolve(&SITE).unwrap();
        let in_second = second_registry.resolve(&SITE).unwrap();
        let in_second_again = second_registry.resolve(&SITE).unwrap();

        assert_eq!(in_first.get(), 0);
        assert_eq!(in_second.get(), 1);
        assert_eq!(in_second, in_second_again);
        assert_eq!(second_registry.len(), 2);

        // The memo still belongs to the first registry.
        assert_eq!(first_registry.resolve(&SITE).unwrap(), in_first);
    }

    #[test]
    fn fold_then_read() {
        let mut registry = registry();
        let id = registry.register("a".into(), "a.rs".into(), 1).unwrap();

        registry.fold(id, 500, 2);

        let totals = registry.totals(id).unwrap();
        assert_eq!(totals.hits(), 2);
        assert_eq!(totals.cycles(), 500);

        // Reading does not clear.
        assert_eq!(registry.totals(id), Some(totals));
    }

    #[test]
    fn take_totals_clears() {
        let mut registry = registry();
        let id = registry.register("a".into(), "a.rs".into(), 1).unwrap();
        registry.fold(id, 7, 1);

        assert_eq!(registry.take_totals(id).unwrap().cycles(), 7);
        assert_eq!(registry.totals(id), Some(Totals::default()));
    }

    #[test]
    fn unknown_record_reads_as_none() {
        let registry = registry();

        assert!(registry.totals(RecordId::new(3)).is_none());
        assert!(registry.info(RecordId::new(3)).is_none());
        assert!(!registry.contains(RecordId::new(3)));
    }

    #[test]
    fn info_reports_identity_and_totals() {
        let mut registry = registry();
        let id = registry
            .register("parse".into(), "parser.rs".into(), 77)
            .unwrap();
        registry.fold(id, 30, 1);

        let info = registry.info(id).unwrap();
        assert_eq!(info.name(), "parse");
        assert_eq!(info.file(), "parser.rs");
        assert_eq!(info.line(), 77);
        assert_eq!(info.totals().cycles(), 30);
    }

    #[test]
    fn duplicates_ignore_different_lines() {
        let mut registry = registry();
        registry.register("a".into(), "a.rs".into(), 1).unwrap();
        registry.register("a".into(), "a.rs".into(), 2).unwrap();
        registry.register("a".into(), "b.rs".into(), 1).unwrap();

        assert!(registry.duplicates().is_empty());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut registry = registry();

        for line in 0..200 {
            registry.register("r".into(), "r.rs".into(), line).unwrap();
        }

        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn replaced_word_is_shared() {
        let mut registry: Registry<Shared> = Registry::new(next_owner());
        let id = registry.register("a".into(), "a.rs".into(), 1).unwrap();
        let shared = SharedTotals::default();

        registry.replace_word(id, shared.clone()).unwrap();
        registry.fold(id, 11, 1);

        assert_eq!(shared.read().cycles(), 11);
    }

    #[test]
    fn replace_word_rejects_unknown_record() {
        let mut registry: Registry<Shared> = Registry::new(next_owner());

        let result = registry.replace_word(RecordId::new(0), SharedTotals::default());

        assert!(matches!(result, Err(Error::UnknownRecord { record: 0 })));
    }

    #[test]
    fn infos_list_records_in_registration_order() {
        let mut registry = Registry::<Local>::new(next_owner());
        let first = registry.register("first".into(), "a.rs".into(), 1).unwrap();
        let second = registry.register("second".into(), "b.rs".into(), 2).unwrap();
        registry.fold(second, 7, 1);

        let infos = registry.infos();

        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].0, first);
        assert_eq!(infos[0].1.name(), "first");
        assert_eq!(infos[1].0, second);
        assert_eq!(infos[1].1.file(), "b.rs");
        assert_eq!(infos[1].1.totals().cycles(), 7);
    }
}
