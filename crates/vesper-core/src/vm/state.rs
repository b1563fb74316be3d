//! The value stack, call stack, and host-visible embedding API (spec §3
//! "State (process-wide scope)", §4.6 "Stack / embedding API").
//!
//! Grounded on `lua_vm/lua_state.rs` (stack/`stack_top`/`call_stack` split,
//! `open_upvalues_list`) and `lua_vm/mod.rs`'s `LuaVM::new` (globals table
//! at a fixed registry slot, `_ENV` wiring).

use crate::error::{Error, ErrorKind, Result};
use crate::gc::pool::{FunctionId, StringId, TableId, UserdataId};
use crate::gc::{GcRef, Heap};
use crate::value::string::LuaStr;
use crate::value::table::Table;
use crate::value::userdata::Userdata;
use crate::value::{CFunction, Value};
use crate::vm::frame::{CallFrame, MULTRET};
use crate::vm::upvalue::OpenUpvalues;
use ahash::AHashMap;

/// Host-tunable knobs (teacher's `SafeOption`).
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub memory_ceiling: i64,
    pub initial_stack_capacity: usize,
    pub gc_pause: u32,
    pub gc_step_mul: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            memory_ceiling: 2 << 30, // 2 GiB, spec §4.5 default
            initial_stack_capacity: 256,
            gc_pause: 200,
            gc_step_mul: 200,
        }
    }
}

const BASIC_STACK_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    Line,
    Call,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

/// What the debug hook asked for before returning (spec §6 "Debugger
/// protocol": "the callback reads a pending-command field... and sets
/// step-target-depth accordingly"). The host sets this from within the
/// hook; [`State::debug_check`] translates it into `step_mode` +
/// `step_target_depth` once the hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

/// Host callback installed via [`State::set_debug_hook`]; invoked with
/// `state.paused == true` whenever execution halts at a breakpoint or step
/// target.
pub type DebugHook = fn(&mut State, DebugEvent);

pub struct State {
    pub heap: Heap,

    stack: Vec<Value>,
    stack_top: usize,
    pub call_stack: Vec<CallFrame>,
    pub open_upvalues: OpenUpvalues,

    pub globals: TableId,
    module_cache: AHashMap<String, TableId>,
    named_metatables: AHashMap<String, TableId>,
    pub string_metatable: Option<TableId>,

    pinned: Vec<Option<Value>>,
    pinned_free: Vec<u32>,

    /// Depth `call_stack.len()` was at when the host's outermost `call`
    /// began; dispatch returns to the host once it unwinds back to this
    /// (spec §4.3 "Returns").
    pub entry_depth: usize,

    /// (source file, line) breakpoints (spec §6 "Debugger protocol").
    pub breakpoints: std::collections::HashSet<(String, u32)>,
    pub step_mode: StepMode,
    pub step_target_depth: usize,
    pub paused: bool,
    pub pending_command: PendingCommand,
    debug_hook: Option<DebugHook>,
    last_line: u32,

    pub error_message: String,

    /// Host-installed callback backing the `import(name)` stdlib function
    /// (spec §6 "Module protocol"): invoked with the requested module name
    /// on the stack when `cached_module` misses. `None` until a host
    /// registers one via [`State::set_module_loader`].
    module_loader: Option<CFunction>,
}

impl State {
    pub fn new(options: RuntimeOptions) -> Self {
        let mut heap = Heap::new(options.memory_ceiling);
        let globals = heap
            .alloc_table(Table::new())
            .expect("fresh globals table fits under any sane memory ceiling");
        State {
            heap,
            stack: vec![Value::Nil; options.initial_stack_capacity.max(BASIC_STACK_SIZE)],
            stack_top: 0,
            call_stack: Vec::new(),
            open_upvalues: OpenUpvalues::new(),
            globals,
            module_cache: AHashMap::new(),
            named_metatables: AHashMap::new(),
            string_metatable: None,
            pinned: Vec::new(),
            pinned_free: Vec::new(),
            entry_depth: 0,
            breakpoints: std::collections::HashSet::new(),
            step_mode: StepMode::Continue,
            step_target_depth: 0,
            paused: false,
            pending_command: PendingCommand::Continue,
            debug_hook: None,
            last_line: 0,
            error_message: String::new(),
            module_loader: None,
        }
    }

    pub fn set_module_loader(&mut self, loader: CFunction) {
        self.module_loader = Some(loader);
    }

    pub fn module_loader(&self) -> Option<CFunction> {
        self.module_loader
    }

    pub fn set_debug_hook(&mut self, hook: DebugHook) {
        self.debug_hook = Some(hook);
    }

    pub fn clear_debug_hook(&mut self) {
        self.debug_hook = None;
    }

    /// Fire `event` through the installed debug hook, if any, with
    /// `paused` set for the duration of the call.
    pub(crate) fn fire_debug_event(&mut self, event: DebugEvent) {
        if let Some(hook) = self.debug_hook {
            self.paused = true;
            hook(self, event);
            self.paused = false;
        }
    }

    /// Called by the dispatch loop before executing the instruction at
    /// `(file, line)` in a frame at call-stack depth `depth` (spec §6
    /// "Debugger protocol"): on a line change into a breakpoint or while a
    /// step mode is active, pauses and invokes the hook, then applies
    /// whatever `pending_command` the hook left behind.
    pub(crate) fn debug_check(&mut self, file: &str, line: u32, depth: usize) {
        if line == self.last_line {
            return;
        }
        self.last_line = line;
        if self.debug_hook.is_none() {
            return;
        }
        let hit_breakpoint = self.breakpoints.contains(&(file.to_string(), line));
        let stepping = match self.step_mode {
            StepMode::Continue => false,
            StepMode::StepInto => true,
            StepMode::StepOver | StepMode::StepOut => depth <= self.step_target_depth,
        };
        if !hit_breakpoint && !stepping {
            return;
        }
        self.fire_debug_event(DebugEvent::Line);
        match self.pending_command {
            PendingCommand::Continue => self.step_mode = StepMode::Continue,
            PendingCommand::StepInto => self.step_mode = StepMode::StepInto,
            PendingCommand::StepOver => {
                self.step_mode = StepMode::StepOver;
                self.step_target_depth = depth;
            }
            PendingCommand::StepOut => {
                self.step_mode = StepMode::StepOut;
                self.step_target_depth = depth.saturating_sub(1);
            }
        }
    }

    // ---------- stack bookkeeping ----------

    pub fn top(&self) -> usize {
        self.stack_top
    }

    /// Active frame's register base, or `0` at top level.
    fn base(&self) -> usize {
        self.call_stack.last().map(|f| f.base).unwrap_or(0)
    }

    /// Resolve an index using the dual absolute/negative convention (spec
    /// §4.6): non-negative is relative to the current frame's base,
    /// negative counts back from the top.
    pub fn resolve_index(&self, idx: i64) -> usize {
        if idx < 0 {
            (self.stack_top as i64 + idx) as usize
        } else {
            self.base() + idx as usize
        }
    }

    pub fn ensure_capacity(&mut self, at_least: usize) {
        if self.stack.len() < at_least {
            self.stack.resize(at_least, Value::Nil);
        }
    }

    /// Absolute stack slot access, bypassing the current frame's base — the
    /// interpreter's register file is `frame.base + reg`, an absolute index
    /// it already computed, not one relative to whatever frame happens to
    /// be on top when the call is made.
    pub fn get_abs(&self, idx: usize) -> Value {
        self.stack.get(idx).copied().unwrap_or(Value::Nil)
    }

    pub fn set_abs(&mut self, idx: usize, v: Value) {
        self.ensure_capacity(idx + 1);
        self.stack[idx] = v;
    }

    pub fn set_top_abs(&mut self, n: usize) {
        self.ensure_capacity(n);
        if n > self.stack_top {
            for v in &mut self.stack[self.stack_top..n] {
                *v = Value::Nil;
            }
        }
        self.stack_top = n;
    }

    pub fn get(&self, idx: i64) -> Value {
        let i = self.resolve_index(idx);
        self.stack.get(i).copied().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, idx: i64, v: Value) {
        let i = self.resolve_index(idx);
        self.ensure_capacity(i + 1);
        self.stack[i] = v;
    }

    pub fn push(&mut self, v: Value) {
        self.ensure_capacity(self.stack_top + 1);
        self.stack[self.stack_top] = v;
        self.stack_top += 1;
    }

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }
    pub fn push_bool(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }
    pub fn push_integer(&mut self, i: i64) {
        self.push(Value::Integer(i));
    }
    pub fn push_float(&mut self, f: f64) {
        self.push(Value::Float(f));
    }
    pub fn push_cfunction(&mut self, f: CFunction) {
        self.push(Value::CFunction(f));
    }

    pub fn push_string(&mut self, s: &str) -> Result<()> {
        let id = self.heap.alloc_string(LuaStr::new(s))?;
        self.push(Value::String(id));
        Ok(())
    }

    pub fn push_table(&mut self) -> Result<TableId> {
        let id = self.heap.alloc_table(Table::new())?;
        self.push(Value::Table(id));
        Ok(id)
    }

    pub fn push_userdata(&mut self, size: usize, uid: u32) -> Result<UserdataId> {
        let id = self.heap.alloc_userdata(Userdata::new(size, uid))?;
        self.push(Value::Userdata(id));
        Ok(id)
    }

    pub fn pop(&mut self, n: usize) {
        self.stack_top = self.stack_top.saturating_sub(n);
    }

    /// `set_top(n)`: extend with nils if growing, truncate if shrinking.
    pub fn set_top(&mut self, n: usize) {
        let base = self.base();
        let new_top = base + n;
        self.ensure_capacity(new_top);
        if new_top > self.stack_top {
            for v in &mut self.stack[self.stack_top..new_top] {
                *v = Value::Nil;
            }
        }
        self.stack_top = new_top;
    }

    /// Number of arguments available to the call currently on top of the
    /// call stack (spec §4.6, teacher's `get_args().len()`): every
    /// `CFunction` reads its arguments through `get(0)..get(arg_count()-1)`.
    pub fn arg_count(&self) -> usize {
        self.stack_top - self.base()
    }

    pub fn dup(&mut self, idx: i64) {
        let v = self.get(idx);
        self.push(v);
    }

    pub fn type_name(&self, idx: i64) -> &'static str {
        self.get(idx).type_name()
    }

    pub fn to_integer(&self, idx: i64) -> Option<i64> {
        self.get(idx).as_integer()
    }

    pub fn to_float(&self, idx: i64) -> Option<f64> {
        self.get(idx).as_float()
    }

    pub fn to_bool(&self, idx: i64) -> bool {
        self.get(idx).is_truthy()
    }

    pub fn to_string_value(&self, idx: i64) -> Option<String> {
        match self.get(idx) {
            Value::String(id) => self.heap.strings.get(id.index()).map(|s| s.as_str().to_string()),
            _ => None,
        }
    }

    // ---------- table access ----------

    pub fn raw_get(&mut self, table_idx: i64, key: Value) -> Result<Value> {
        match self.get(table_idx) {
            Value::Table(id) => {
                let t = self
                    .heap
                    .tables
                    .get(id.index())
                    .ok_or_else(|| Error::type_error("attempt to index an invalid table"))?;
                Ok(t.raw_get(&key))
            }
            other => Err(Error::type_error(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    pub fn raw_set(&mut self, table_idx: i64, key: Value, value: Value) -> Result<()> {
        match self.get(table_idx) {
            Value::Table(id) => {
                if key.is_nil() {
                    return Err(Error::type_error("table index is nil"));
                }
                if let Value::Float(f) = key {
                    if f.is_nan() {
                        return Err(Error::type_error("table index is NaN"));
                    }
                }
                self.heap.write_barrier(GcRef::Table(id), value);
                let t = self
                    .heap
                    .tables
                    .get_mut(id.index())
                    .ok_or_else(|| Error::type_error("attempt to index an invalid table"))?;
                t.raw_set(key, value);
                Ok(())
            }
            other => Err(Error::type_error(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    pub fn table_len(&mut self, table_idx: i64) -> Result<i64> {
        match self.get(table_idx) {
            Value::Table(id) => {
                let t = self
                    .heap
                    .tables
                    .get_mut(id.index())
                    .ok_or_else(|| Error::type_error("attempt to get length of an invalid table"))?;
                Ok(t.len() as i64)
            }
            Value::String(id) => {
                let s = self
                    .heap
                    .strings
                    .get(id.index())
                    .ok_or_else(|| Error::type_error("attempt to get length of an invalid string"))?;
                Ok(s.len() as i64)
            }
            other => Err(Error::type_error(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        }
    }

    pub fn next(&self, table_idx: i64, key: Option<Value>) -> Result<Option<(Value, Value)>> {
        match self.get(table_idx) {
            Value::Table(id) => {
                let t = self
                    .heap
                    .tables
                    .get(id.index())
                    .ok_or_else(|| Error::type_error("attempt to iterate an invalid table"))?;
                Ok(t.next(key))
            }
            other => Err(Error::type_error(format!(
                "attempt to iterate a {} value",
                other.type_name()
            ))),
        }
    }

    pub fn table_metatable(&self, id: TableId) -> Option<TableId> {
        self.heap.tables.get(id.index()).and_then(|t| t.metatable)
    }

    pub fn set_table_metatable(&mut self, id: TableId, mt: Option<TableId>) {
        if let Some(mt_id) = mt {
            self.heap.write_barrier(GcRef::Table(id), Value::Table(mt_id));
        }
        if let Some(t) = self.heap.tables.get_mut(id.index()) {
            t.metatable = mt;
        }
    }

    pub fn set_userdata_metatable(&mut self, id: UserdataId, mt: Option<TableId>) {
        if let Some(mt_id) = mt {
            self.heap.write_barrier(GcRef::Userdata(id), Value::Table(mt_id));
        }
        if let Some(u) = self.heap.userdata.get_mut(id.index()) {
            u.metatable = mt;
        }
    }

    /// Raw byte payload of a userdata (spec §3 "Userdata"): host bindings
    /// (e.g. `vesper-derive`'s generated glue) reinterpret these bytes as
    /// whatever representation they chose when the value was pushed.
    pub fn userdata_bytes_mut(&mut self, id: UserdataId) -> Option<&mut [u8]> {
        self.heap.userdata.get_mut(id.index()).map(|u| &mut *u.data)
    }

    pub fn userdata_uid(&self, id: UserdataId) -> Option<u32> {
        self.heap.userdata.get(id.index()).map(|u| u.uid)
    }

    pub fn metatable_of(&self, v: Value) -> Option<TableId> {
        match v {
            Value::Table(id) => self.table_metatable(id),
            Value::Userdata(id) => self.heap.userdata.get(id.index()).and_then(|u| u.metatable),
            Value::String(_) => self.string_metatable,
            _ => None,
        }
    }

    pub fn named_metatable(&self, name: &str) -> Option<TableId> {
        self.named_metatables.get(name).copied()
    }

    pub fn register_named_metatable(&mut self, name: &str, id: TableId) {
        self.named_metatables.insert(name.to_string(), id);
    }

    // ---------- globals ----------

    pub fn get_global(&mut self, name: &str) -> Result<Value> {
        let key = self.intern(name)?;
        self.heap
            .tables
            .get(self.globals.index())
            .map(|t| t.raw_get(&key))
            .ok_or_else(|| Error::runtime_error("globals table missing"))
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> Result<()> {
        let key = self.intern(name)?;
        self.heap.write_barrier(GcRef::Table(self.globals), value);
        if let Some(t) = self.heap.tables.get_mut(self.globals.index()) {
            t.raw_set(key, value);
        }
        Ok(())
    }

    fn intern(&mut self, s: &str) -> Result<Value> {
        Ok(Value::String(self.heap.alloc_string(LuaStr::new(s))?))
    }

    // ---------- module cache ----------

    pub fn cached_module(&self, name: &str) -> Option<TableId> {
        self.module_cache.get(name).copied()
    }

    pub fn cache_module(&mut self, name: &str, table: TableId) {
        self.module_cache.insert(name.to_string(), table);
    }

    // ---------- pinning ----------

    /// Pop the top value and return a dense, recyclable handle rooting it
    /// until `unpin` (spec §4.6 "Pinning").
    pub fn pin_top(&mut self) -> u32 {
        let v = self.get(-1);
        self.pop(1);
        if let Some(idx) = self.pinned_free.pop() {
            self.pinned[idx as usize] = Some(v);
            idx
        } else {
            let idx = self.pinned.len() as u32;
            self.pinned.push(Some(v));
            idx
        }
    }

    pub fn pinned_push(&mut self, handle: u32) -> Result<()> {
        let v = self
            .pinned
            .get(handle as usize)
            .and_then(|o| *o)
            .ok_or_else(|| Error::runtime_error("invalid or unpinned handle"))?;
        self.push(v);
        Ok(())
    }

    pub fn unpin(&mut self, handle: u32) {
        if let Some(slot) = self.pinned.get_mut(handle as usize) {
            *slot = None;
            self.pinned_free.push(handle);
        }
    }

    pub fn pinned_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.pinned.iter().filter_map(|o| *o)
    }

    // ---------- GC driving ----------

    /// Gray every root the `Heap` cannot see on its own (spec §4.5
    /// "Roots"): the value stack, call stack prototypes' constant-born
    /// values are interned at load time so need no separate marking, the
    /// upvalue store (entries are grayed transitively from closures),
    /// pinned-values table, globals, module cache, named-metatable
    /// registry.
    fn mark_roots(&mut self) {
        for i in 0..self.stack_top {
            let v = self.stack[i];
            self.heap.mark_value(v);
        }
        for frame in &self.call_stack {
            if let Some(f) = frame.function {
                self.heap.mark_ref(GcRef::Function(f));
            }
        }
        self.heap.mark_ref(GcRef::Table(self.globals));
        for id in self.module_cache.values() {
            self.heap.mark_ref(GcRef::Table(*id));
        }
        for id in self.named_metatables.values() {
            self.heap.mark_ref(GcRef::Table(*id));
        }
        if let Some(id) = self.string_metatable {
            self.heap.mark_ref(GcRef::Table(id));
        }
        let pinned: Vec<Value> = self.pinned_values().collect();
        for v in pinned {
            self.heap.mark_value(v);
        }
    }

    /// One incremental GC step (spec §4.5 "Incremental pacing"); called by
    /// the interpreter after allocations accumulate positive debt.
    pub fn gc_step(&mut self) {
        use crate::gc::GcPhase;
        if self.heap.is_running() {
            return; // re-entrancy guard (spec §4.5 "Re-entrancy")
        }
        self.heap.set_running(true);
        match self.heap.phase {
            GcPhase::Idle => {
                self.heap.restart();
                self.mark_roots();
            }
            GcPhase::Mark => {
                let budget = self.heap.step_budget();
                if self.heap.propagate_step(budget) {
                    self.heap.enter_sweep();
                }
            }
            GcPhase::Sweep => {
                let budget = self.heap.step_budget();
                if self.heap.sweep_step(budget) {
                    self.heap.finish_cycle();
                }
            }
        }
        self.heap.set_running(false);
    }

    /// Perform one incremental step only if allocation debt has gone
    /// positive (spec §4.5 "Incremental pacing"). The dispatch loop calls
    /// this once per instruction rather than unconditionally stepping.
    pub fn gc_maybe_step(&mut self) {
        if self.heap.should_step() {
            self.gc_step();
        }
    }

    /// Drain the finalize queue, running each userdata's `__gc` in
    /// isolation (spec §4.5 "Finalization"). Errors raised by a finalizer
    /// are swallowed (logged) rather than propagated, per spec.
    pub fn run_finalizers(&mut self) -> Vec<Error> {
        let mut errors = Vec::new();
        while let Some(id) = self.heap.finalize_queue.pop() {
            let Some(mt) = self.heap.userdata.get(id.index()).and_then(|u| u.metatable) else {
                continue;
            };
            let Some(gc_fn) = crate::vm::metamethod::lookup(
                self,
                Value::Userdata(id),
                crate::vm::metamethod::MetaMethod::Gc,
            ) else {
                continue;
            };
            let pos = self.top();
            self.push(gc_fn);
            self.push(Value::Userdata(id));
            if let Err(e) = crate::vm::interp::call(self, pos, 1, 0) {
                log::debug!("__gc finalizer raised: {e}");
                errors.push(e);
            }
            self.set_top_abs(pos);
            let size = self
                .heap
                .userdata
                .get(id.index())
                .map(|u| u.byte_size())
                .unwrap_or(0);
            self.heap.record_dealloc(size);
            self.heap.userdata.free_slot(id.index());
        }
        errors
    }

    /// Run GC steps to completion (`gc_collect()` in the embedding API).
    /// `gc_collect(); gc_collect()` is idempotent for observable state
    /// (spec §8 round-trip property): a full cycle is always driven
    /// Idle -> Mark -> Sweep -> Idle, so calling this while already idle
    /// starts and finishes one more complete cycle rather than no-op'ing.
    pub fn gc_collect(&mut self) {
        use crate::gc::GcPhase;
        // Drive through one full cycle no matter which phase we start in.
        self.gc_step(); // Idle -> Mark (or advance within Mark/Sweep)
        while self.heap.phase != GcPhase::Idle {
            self.gc_step();
        }
        self.run_finalizers();
    }

    pub fn raise(&self, msg: impl Into<String>) -> Error {
        Error::runtime_error(msg)
    }
}
