//! `Prototype` and `Closure` (spec §3).
//!
//! Grounded on `gc/object_pool.rs`'s `GcFunction { chunk: Rc<Chunk>,
//! upvalues: Vec<UpvalueId> }`: a closure is a cheap handle (prototype
//! pointer + upvalue index vector), the heavy immutable data (bytecode,
//! constant pools, debug info) lives once in the shared `Prototype`.

use crate::gc::pool::{StringId, UpvalueId};
use crate::gc::Heap;
use crate::value::string::LuaStr;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Where a closure's upvalue descriptor resolves to when the closure is
/// created (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub enum UpvalueDesc {
    /// Capture the enclosing function's local at this register.
    ParentLocal(u32),
    /// Share the enclosing function's upvalue at this index.
    ParentUpvalue(u32),
}

/// The static, immutable description of a function (spec §3 "Prototype").
pub struct Prototype {
    pub bytecode: Vec<u32>,
    /// Parallel to `bytecode`: (line, column) of the source token each
    /// instruction was emitted from.
    pub lines: Vec<(u32, u32)>,

    pub string_constants: Vec<String>,
    pub integer_constants: Vec<i64>,
    pub float_constants: Vec<f64>,
    /// Unified dispatch order over the three pools above, indexed directly
    /// by a `LoadK` instruction's `Bx` operand — the three typed pools
    /// above satisfy spec §3's "separate pools for strings, integers,
    /// floats" wording; this is the single lookup codegen actually emits
    /// against.
    pub constants: Vec<ConstantRef>,
    /// Per-string-constant interning cache: `LoadK` of a `ConstantRef::String`
    /// must yield the *same* `StringId` every time so `==` on two loads of
    /// the same constant stays `raw_equal` (string identity, not content,
    /// is what `Value::String` compares) — filled lazily against whichever
    /// heap first executes this prototype.
    string_cache: RefCell<Vec<Option<StringId>>>,

    pub nested: Vec<Rc<Prototype>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub upvalue_names: Vec<String>,

    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u32,
    /// True for a chunk's top-level prototype when it was compiled as a
    /// module (spec §4.3 "SetGlobal"): assigning to a name with no prior
    /// declaration in the globals table is then a `SemanticError` instead of
    /// a silent create. Nested function prototypes always inherit `false`.
    pub module_mode: bool,

    pub source_name: Option<String>,
    pub name: Option<String>,
}

impl Prototype {
    pub fn new() -> Self {
        Prototype {
            bytecode: Vec::new(),
            lines: Vec::new(),
            string_constants: Vec::new(),
            integer_constants: Vec::new(),
            float_constants: Vec::new(),
            constants: Vec::new(),
            string_cache: RefCell::new(Vec::new()),
            nested: Vec::new(),
            upvalue_descs: Vec::new(),
            upvalue_names: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            module_mode: false,
            source_name: None,
            name: None,
        }
    }

    pub fn line_at(&self, pc: usize) -> (u32, u32) {
        self.lines.get(pc).copied().unwrap_or((0, 0))
    }

    /// Resolve `string_constants[idx]` to a `StringId`, interning it into
    /// `heap` the first time this prototype is executed against it.
    pub fn interned_string(&self, idx: u32, heap: &mut Heap) -> crate::error::Result<StringId> {
        let idx = idx as usize;
        {
            let cache = self.string_cache.borrow();
            if let Some(Some(id)) = cache.get(idx) {
                return Ok(*id);
            }
        }
        let s = self
            .string_constants
            .get(idx)
            .ok_or_else(|| crate::error::Error::runtime_error("invalid string constant index"))?;
        let id = heap.alloc_string(LuaStr::new(s))?;
        let mut cache = self.string_cache.borrow_mut();
        if cache.len() <= idx {
            cache.resize(idx + 1, None);
        }
        cache[idx] = Some(id);
        Ok(id)
    }
}

impl Default for Prototype {
    fn default() -> Self {
        Self::new()
    }
}

/// A runtime function value: a prototype paired with the upvalues it
/// captured at creation time (spec §3 "Closure").
pub struct Closure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<UpvalueId>,
}

impl Closure {
    pub fn new(proto: Rc<Prototype>, upvalues: Vec<UpvalueId>) -> Self {
        Closure { proto, upvalues }
    }

    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.upvalues.len() * std::mem::size_of::<UpvalueId>()
    }
}

/// A constant pulled out of a prototype's pools and turned into a runtime
/// `Value` at the point it's loaded (string/table constants need interning
/// through the active heap, so this stays a separate step from storage).
#[derive(Debug, Clone, Copy)]
pub enum ConstantRef {
    Integer(i64),
    Float(f64),
    String(u32),
}

/// Placeholder sentinel returned by metamethod plumbing that found nothing
/// to call — kept distinct from `Value::Nil` so callers can tell "no
/// metamethod" apart from "metamethod explicitly returned nil".
pub const NO_METHOD: Value = Value::NullOpt;
