//! Tri-color incremental mark-and-sweep collector (spec §4.5).
//!
//! Grounded on the teacher's `gc/mod.rs` state machine (`GcState`,
//! `gc_debt`/`total_bytes` pacing, `mark_one`/`propagate_mark`, `atomic`,
//! `sweep_step`, write barriers), trimmed to the three phases spec.md
//! actually specifies (Idle/Mark/Sweep — no generational minor collection,
//! see DESIGN.md "Dependency drops").

pub mod header;
pub mod pool;

use crate::error::{Error, ErrorKind, Result};
use crate::gc::header::Color;
use crate::gc::pool::{FunctionId, Pool, StringId, TableId, UserdataId, UpvalueId};
use crate::value::function::Closure;
use crate::value::string::LuaStr;
use crate::value::table::Table;
use crate::value::userdata::Userdata;
use crate::value::Value;
use crate::vm::upvalue::UpvalueState;
use ahash::AHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Mark,
    Sweep,
}

/// A reference to any heap object, used for the gray worklist and for
/// write-barrier call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcRef {
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    Upvalue(UpvalueId),
}

/// GC tuning parameters (teacher's `gc_params`, spec §4.5 pacing).
#[derive(Debug, Clone, Copy)]
pub struct GcParams {
    /// Percent of live bytes the next cycle's threshold is set to.
    pub pause: u32,
    /// How much incremental work one debt-unit buys, in percent.
    pub step_mul: u32,
    /// Bytes of work performed per incremental step call.
    pub step_size: usize,
}

impl Default for GcParams {
    fn default() -> Self {
        GcParams {
            pause: 200,
            step_mul: 200,
            step_size: 64,
        }
    }
}

pub struct Heap {
    pub strings: Pool<LuaStr>,
    pub tables: Pool<Table>,
    pub functions: Pool<Closure>,
    pub userdata: Pool<Userdata>,
    pub upvalues: Pool<UpvalueState>,

    /// Content -> id map so `Value::String` equality/hashing, which compares
    /// `StringId`s rather than threading `Heap` through `impl Hash`/`Eq`,
    /// stays equivalent to spec §3's "strings compare by bytes": identical
    /// content always resolves to the same id. Spec §3 only says interning
    /// "is not required", it doesn't forbid it — this is the cheapest way
    /// to keep `Value`'s trait impls heap-free and still correct. Strings
    /// are otherwise immutable, so interning never observes a stale value.
    string_intern: AHashMap<Box<str>, StringId>,

    pub current_white: Color,
    pub phase: GcPhase,
    gray: Vec<GcRef>,
    /// Userdata with a `__gc` metamethod that became unreachable; finalized
    /// after sweep, one at a time, each run in isolation (spec §4.5).
    pub finalize_queue: Vec<UserdataId>,

    pub total_bytes: i64,
    threshold: i64,
    debt: i64,
    params: GcParams,
    pub memory_ceiling: i64,
    gc_running: bool,
    pub collections: u64,
}

impl Heap {
    pub fn new(memory_ceiling: i64) -> Self {
        Heap {
            strings: Pool::new(),
            tables: Pool::new(),
            functions: Pool::new(),
            userdata: Pool::new(),
            upvalues: Pool::new(),
            string_intern: AHashMap::new(),
            current_white: Color::White0,
            phase: GcPhase::Idle,
            gray: Vec::new(),
            finalize_queue: Vec::new(),
            total_bytes: 0,
            threshold: 1 << 16,
            debt: 0,
            params: GcParams::default(),
            memory_ceiling,
            gc_running: false,
            collections: 0,
        }
    }

    fn other_white(&self) -> Color {
        match self.current_white {
            Color::White0 => Color::White1,
            Color::White1 => Color::White0,
            _ => Color::White0,
        }
    }

    // ---------- allocation tracking ----------

    /// Checked allocation accounting (spec §4.5 "Memory ceiling"): raises
    /// `OutOfMemory` rather than corrupting the counters.
    pub fn track_alloc(&mut self, bytes: usize) -> Result<()> {
        let delta = bytes as i64;
        if self.total_bytes + delta > self.memory_ceiling {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                format!(
                    "allocation of {bytes} bytes would exceed the {}-byte memory ceiling",
                    self.memory_ceiling
                ),
            ));
        }
        self.total_bytes += delta;
        self.debt += delta;
        Ok(())
    }

    pub fn record_dealloc(&mut self, bytes: usize) {
        self.total_bytes -= bytes as i64;
    }

    pub fn should_step(&self) -> bool {
        self.debt > 0
    }

    // ---------- allocation entry points ----------

    pub fn alloc_string(&mut self, s: LuaStr) -> Result<StringId> {
        if let Some(id) = self.string_intern.get(s.as_str()) {
            return Ok(*id);
        }
        let size = s.byte_size();
        self.track_alloc(size)?;
        let id = StringId(self.strings.insert(self.current_white, s.clone()));
        self.string_intern.insert(Box::from(s.as_str()), id);
        Ok(id)
    }

    pub fn alloc_table(&mut self, t: Table) -> Result<TableId> {
        self.track_alloc(t.byte_size() + 32)?;
        Ok(TableId(self.tables.insert(self.current_white, t)))
    }

    pub fn alloc_function(&mut self, f: Closure) -> Result<FunctionId> {
        self.track_alloc(f.byte_size())?;
        Ok(FunctionId(self.functions.insert(self.current_white, f)))
    }

    pub fn alloc_userdata(&mut self, u: Userdata) -> Result<UserdataId> {
        self.track_alloc(u.byte_size())?;
        Ok(UserdataId(self.userdata.insert(self.current_white, u)))
    }

    pub fn alloc_upvalue(&mut self, u: UpvalueState) -> UpvalueId {
        // Upvalues are small and always reachable from a live frame or
        // closure while open; they aren't charged against the ceiling.
        UpvalueId(self.upvalues.insert(self.current_white, u))
    }

    // ---------- marking ----------

    fn header_color(&self, r: GcRef) -> Option<Color> {
        match r {
            GcRef::String(id) => self.strings.header(id.index()).map(|h| h.color),
            GcRef::Table(id) => self.tables.header(id.index()).map(|h| h.color),
            GcRef::Function(id) => self.functions.header(id.index()).map(|h| h.color),
            GcRef::Userdata(id) => self.userdata.header(id.index()).map(|h| h.color),
            GcRef::Upvalue(id) => self.upvalues.header(id.index()).map(|h| h.color),
        }
    }

    fn set_color(&mut self, r: GcRef, color: Color) {
        let header = match r {
            GcRef::String(id) => self.strings.header_mut(id.index()),
            GcRef::Table(id) => self.tables.header_mut(id.index()),
            GcRef::Function(id) => self.functions.header_mut(id.index()),
            GcRef::Userdata(id) => self.userdata.header_mut(id.index()),
            GcRef::Upvalue(id) => self.upvalues.header_mut(id.index()),
        };
        if let Some(h) = header {
            h.color = color;
        }
    }

    /// Gray a GC ref if it is currently white; no-op otherwise. This is the
    /// single enqueue point used for both roots and child references.
    pub fn mark_ref(&mut self, r: GcRef) {
        if let Some(color) = self.header_color(r) {
            if color == Color::White0 || color == Color::White1 {
                self.set_color(r, Color::Gray);
                self.gray.push(r);
            }
        }
    }

    pub fn mark_value(&mut self, v: Value) {
        let r = match v {
            Value::String(id) => GcRef::String(id),
            Value::Table(id) => GcRef::Table(id),
            Value::Function(id) => GcRef::Function(id),
            Value::Userdata(id) => GcRef::Userdata(id),
            _ => return,
        };
        self.mark_ref(r);
    }

    /// Write barrier (spec §4.5): call whenever a GC-owned slot is mutated
    /// to reference `child`, while `parent` might already be black. Forward
    /// variant: re-gray the child rather than the parent.
    pub fn write_barrier(&mut self, parent: GcRef, child: Value) {
        if self.phase != GcPhase::Mark {
            return;
        }
        if self.header_color(parent) == Some(Color::Black) {
            self.mark_value(child);
        }
    }

    fn propagate_one(&mut self, r: GcRef) {
        self.set_color(r, Color::Black);
        match r {
            GcRef::String(_) => {} // no outgoing refs
            GcRef::Table(id) => {
                if let Some(t) = self.tables.get(id.index()) {
                    let mt = t.metatable;
                    let mut children = Vec::new();
                    for i in 0..t.array_len() {
                        children.push(t.raw_get(&Value::Integer(i as i64)));
                    }
                    for (k, v) in t.next_pairs_snapshot() {
                        children.push(k);
                        children.push(v);
                    }
                    for c in children {
                        self.mark_value(c);
                    }
                    if let Some(mt) = mt {
                        self.mark_ref(GcRef::Table(mt));
                    }
                }
            }
            GcRef::Function(id) => {
                if let Some(f) = self.functions.get(id.index()) {
                    for up in f.upvalues.clone() {
                        self.mark_ref(GcRef::Upvalue(up));
                    }
                }
            }
            GcRef::Userdata(id) => {
                if let Some(u) = self.userdata.get(id.index()) {
                    if let Some(mt) = u.metatable {
                        self.mark_ref(GcRef::Table(mt));
                    }
                }
            }
            GcRef::Upvalue(id) => {
                if let Some(UpvalueState::Closed(v)) = self.upvalues.get(id.index()) {
                    self.mark_value(*v);
                }
            }
        }
    }

    /// Restart a collection cycle: flip whites, clear gray. Roots are
    /// grayed by the caller (`State::gc_step`) right after this returns,
    /// since they live outside `Heap`.
    pub fn restart(&mut self) {
        self.current_white = self.other_white();
        self.gray.clear();
        self.phase = GcPhase::Mark;
    }

    /// Drain up to `budget` gray objects. Returns `true` once the gray set
    /// is empty (mark phase complete).
    pub fn propagate_step(&mut self, budget: usize) -> bool {
        for _ in 0..budget {
            let Some(r) = self.gray.pop() else {
                return true;
            };
            self.propagate_one(r);
        }
        self.gray.is_empty()
    }

    pub fn enter_sweep(&mut self) {
        self.phase = GcPhase::Sweep;
    }

    /// Sweep up to `budget` objects across all pools. Returns `true` once
    /// every `other`-colored (dead) object in every pool has actually been
    /// freed this cycle, `false` if budget ran out first and another call
    /// is required before the cycle can finish.
    pub fn sweep_step(&mut self, budget: usize) -> bool {
        let white = self.current_white;
        let other = self.other_white();
        let mut remaining = budget;
        let mut more_work = false;

        // Each pool scan is capped at `remaining + 1` so we can tell
        // whether a dead entry was left unprocessed without scanning the
        // whole pool — finding one extra match beyond what the budget
        // allows is enough to know there's more sweeping left to do.
        let dead_strings: Vec<u32> = self
            .strings
            .live_ids()
            .filter(|&id| self.strings.header(id).map(|h| h.color) == Some(other))
            .take(remaining + 1)
            .collect();
        more_work |= dead_strings.len() > remaining;
        let take_n = dead_strings.len().min(remaining);
        for id in &dead_strings[..take_n] {
            if let Some(s) = self.strings.get(*id) {
                let size = s.byte_size();
                self.record_dealloc(size);
                self.string_intern.remove(s.as_str());
            }
            self.strings.free_slot(*id);
        }
        remaining -= take_n;

        let dead_tables: Vec<u32> = self
            .tables
            .live_ids()
            .filter(|&id| self.tables.header(id).map(|h| h.color) == Some(other))
            .take(remaining + 1)
            .collect();
        more_work |= dead_tables.len() > remaining;
        let take_n = dead_tables.len().min(remaining);
        for id in &dead_tables[..take_n] {
            if let Some(t) = self.tables.get(*id) {
                let size = t.byte_size() + 32;
                self.record_dealloc(size);
            }
            self.tables.free_slot(*id);
        }
        remaining -= take_n;

        let dead_functions: Vec<u32> = self
            .functions
            .live_ids()
            .filter(|&id| self.functions.header(id).map(|h| h.color) == Some(other))
            .take(remaining + 1)
            .collect();
        more_work |= dead_functions.len() > remaining;
        let take_n = dead_functions.len().min(remaining);
        for id in &dead_functions[..take_n] {
            if let Some(f) = self.functions.get(*id) {
                let size = f.byte_size();
                self.record_dealloc(size);
            }
            self.functions.free_slot(*id);
        }
        remaining -= take_n;

        let dead_userdata: Vec<u32> = self
            .userdata
            .live_ids()
            .filter(|&id| self.userdata.header(id).map(|h| h.color) == Some(other))
            .take(remaining + 1)
            .collect();
        more_work |= dead_userdata.len() > remaining;
        let take_n = dead_userdata.len().min(remaining);
        for id in dead_userdata.into_iter().take(take_n) {
            let has_finalizer = self
                .userdata
                .get(id)
                .map(|u| u.metatable.is_some())
                .unwrap_or(false);
            if has_finalizer {
                if let Some(h) = self.userdata.header_mut(id) {
                    if !h.finalized {
                        h.finalized = true;
                        self.finalize_queue.push(UserdataId(id));
                        continue;
                    }
                }
            }
            if let Some(u) = self.userdata.get(id) {
                let size = u.byte_size();
                self.record_dealloc(size);
            }
            self.userdata.free_slot(id);
        }

        if more_work {
            return false;
        }

        // Every pool has had its `other`-colored (dead) entries freed for
        // this cycle: flip survivors (anything not `white` already) to
        // `white` for the next cycle.
        for id in self.strings.live_ids().collect::<Vec<_>>() {
            if let Some(h) = self.strings.header_mut(id) {
                if h.color != white {
                    h.color = white;
                }
            }
        }
        for id in self.tables.live_ids().collect::<Vec<_>>() {
            if let Some(h) = self.tables.header_mut(id) {
                if h.color != white {
                    h.color = white;
                }
            }
        }
        for id in self.functions.live_ids().collect::<Vec<_>>() {
            if let Some(h) = self.functions.header_mut(id) {
                if h.color != white {
                    h.color = white;
                }
            }
        }
        for id in self.userdata.live_ids().collect::<Vec<_>>() {
            if let Some(h) = self.userdata.header_mut(id) {
                if h.color != white {
                    h.color = white;
                }
            }
        }
        for id in self.upvalues.live_ids().collect::<Vec<_>>() {
            if let Some(h) = self.upvalues.header_mut(id) {
                h.color = white;
            }
        }

        self.strings.maybe_grow_cap();
        self.tables.maybe_grow_cap();
        self.functions.maybe_grow_cap();

        true
    }

    pub fn finish_cycle(&mut self) {
        self.phase = GcPhase::Idle;
        self.threshold = (self.total_bytes * self.params.pause as i64) / 100;
        self.debt = self.total_bytes - self.threshold;
        self.collections += 1;
    }

    pub fn is_running(&self) -> bool {
        self.gc_running
    }

    pub fn set_running(&mut self, running: bool) {
        self.gc_running = running;
    }

    pub fn step_budget(&self) -> usize {
        (self.params.step_size * self.params.step_mul as usize / 100).max(8)
    }

    pub fn total_bytes(&self) -> i64 {
        self.total_bytes
    }
}
