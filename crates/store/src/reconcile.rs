//! Keyed-list reconciliation: snapshot + overlay -> render plan.

#![forbid(unsafe_code)]

use mirador_core::{Entity, FieldSet};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::overlay::OverlayStore;

/// Presentation mode of a row, owned by the overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowMode {
    pub expanded: bool,
    pub editing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RenderOp {
    /// Append a new row at the end of the list.
    Insert { key: String, fields: FieldSet },
    /// Replace only the listed fields of an existing row.
    Update { key: String, changed: FieldSet },
    Remove { key: String },
    /// Re-apply presentation mode to a row.
    Mode { key: String, mode: RowMode },
}

impl RenderOp {
    pub fn key(&self) -> &str {
        match self {
            RenderOp::Insert { key, .. }
            | RenderOp::Update { key, .. }
            | RenderOp::Remove { key }
            | RenderOp::Mode { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub inserts: usize,
    pub updates: usize,
    pub removes: usize,
    pub modes: usize,
}

/// Ordered operations: removes, then inserts/updates in incoming order, then
/// mode re-application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderPlan {
    pub ops: Vec<RenderOp>,
}

impl RenderPlan {
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
    pub fn len(&self) -> usize { self.ops.len() }

    pub fn counts(&self) -> PlanCounts {
        let mut c = PlanCounts::default();
        for op in &self.ops {
            match op {
                RenderOp::Insert { .. } => c.inserts += 1,
                RenderOp::Update { .. } => c.updates += 1,
                RenderOp::Remove { .. } => c.removes += 1,
                RenderOp::Mode { .. } => c.modes += 1,
            }
        }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    pub key: String,
    pub fields: FieldSet,
    pub mode: RowMode,
}

impl RenderedRow {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// What is currently presented for one list: rows in display order plus a key
/// index. This is the only prior state the reconciler looks at.
#[derive(Debug, Clone, Default)]
pub struct RenderedList {
    rows: Vec<RenderedRow>,
    index: FxHashMap<String, usize>,
}

impl RenderedList {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn rows(&self) -> &[RenderedRow] { &self.rows }
    pub fn contains(&self, key: &str) -> bool { self.index.contains_key(key) }

    pub fn get(&self, key: &str) -> Option<&RenderedRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.key.as_str())
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.index.clear();
    }

    /// Apply a plan produced by [`reconcile`] against this list.
    pub fn apply(&mut self, plan: &RenderPlan) {
        let mut removed = false;
        for op in &plan.ops {
            match op {
                RenderOp::Remove { key } => {
                    if self.index.remove(key).is_some() {
                        self.rows.retain(|r| &r.key != key);
                        removed = true;
                    }
                }
                RenderOp::Insert { key, fields } => {
                    if removed {
                        self.reindex();
                        removed = false;
                    }
                    if let Some(&i) = self.index.get(key) {
                        self.rows[i].fields = fields.clone();
                    } else {
                        self.index.insert(key.clone(), self.rows.len());
                        self.rows.push(RenderedRow { key: key.clone(), fields: fields.clone(), mode: RowMode::default() });
                    }
                }
                RenderOp::Update { key, changed } => {
                    if removed {
                        self.reindex();
                        removed = false;
                    }
                    if let Some(&i) = self.index.get(key) {
                        let row = &mut self.rows[i];
                        for (name, value) in changed {
                            match row.fields.iter_mut().find(|(k, _)| k == name) {
                                Some(slot) => slot.1 = value.clone(),
                                None => row.fields.push((name.clone(), value.clone())),
                            }
                        }
                    }
                }
                RenderOp::Mode { key, mode } => {
                    if removed {
                        self.reindex();
                        removed = false;
                    }
                    if let Some(&i) = self.index.get(key) {
                        self.rows[i].mode = *mode;
                    }
                }
            }
        }
        if removed {
            self.reindex();
        }
    }

    /// Set a row's mode outside a reconciliation pass (e.g. after a toggle).
    /// Returns the op to present, or `None` when nothing changed.
    pub fn set_mode(&mut self, key: &str, mode: RowMode) -> Option<RenderOp> {
        let &i = self.index.get(key)?;
        if self.rows[i].mode == mode {
            return None;
        }
        self.rows[i].mode = mode;
        Some(RenderOp::Mode { key: key.to_string(), mode })
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, r) in self.rows.iter().enumerate() {
            self.index.insert(r.key.clone(), i);
        }
    }
}

fn value_of<'a>(fields: &'a FieldSet, name: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

/// Fields of `next` that differ from `prev`. A field that disappeared is
/// reported with an empty value.
fn diff_fields(prev: &FieldSet, next: &FieldSet) -> FieldSet {
    let mut changed = FieldSet::new();
    for (k, v) in next {
        if value_of(prev, k) != Some(v.as_str()) {
            changed.push((k.clone(), v.clone()));
        }
    }
    for (k, v) in prev {
        if !v.is_empty() && value_of(next, k).is_none() {
            changed.push((k.clone(), String::new()));
        }
    }
    changed
}

/// Last occurrence wins, and takes the position of that last occurrence.
fn dedupe_last<E: Entity>(incoming: &[E]) -> Vec<&E> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out: Vec<&E> = Vec::with_capacity(incoming.len());
    for e in incoming.iter().rev() {
        if seen.insert(e.key()) {
            out.push(e);
        }
    }
    out.reverse();
    out
}

/// Compute the operations that bring `rendered` in line with `incoming`, with
/// row modes taken from `overlay`. Pure: the same inputs always yield the same
/// plan, and reconciling an already-applied snapshot yields an empty plan.
pub fn reconcile<E: Entity>(rendered: &RenderedList, incoming: &[E], overlay: &OverlayStore) -> RenderPlan {
    let items = dedupe_last(incoming);
    let live: FxHashSet<&str> = items.iter().map(|e| e.key()).collect();
    let mut ops = Vec::new();

    for row in rendered.rows() {
        if !live.contains(row.key.as_str()) {
            ops.push(RenderOp::Remove { key: row.key.clone() });
        }
    }

    for e in &items {
        let fields = e.fields();
        match rendered.get(e.key()) {
            None => ops.push(RenderOp::Insert { key: e.key().to_string(), fields }),
            Some(row) => {
                let changed = diff_fields(&row.fields, &fields);
                if !changed.is_empty() {
                    ops.push(RenderOp::Update { key: e.key().to_string(), changed });
                }
            }
        }
    }

    for e in &items {
        let want = overlay.mode_of(e.key());
        let have = rendered.get(e.key()).map(|r| r.mode).unwrap_or_default();
        if want != have {
            ops.push(RenderOp::Mode { key: e.key().to_string(), mode: want });
        }
    }

    RenderPlan { ops }
}
