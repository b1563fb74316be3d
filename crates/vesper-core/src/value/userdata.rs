//! Userdata: a host-owned byte payload tagged with a type id (spec §3
//! "Userdata").
//!
//! Grounded on `gc/object_pool.rs`'s arena-object pattern; the FNV-1a UID
//! scheme matches spec §3's "32-bit FNV-1a of a type name, produced at
//! registration time".

use crate::gc::pool::TableId;

/// FNV-1a over a type name, computed once when the host registers a
/// userdata type (spec §3 "Userdata").
pub fn fnv1a_32(name: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in name.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

pub struct Userdata {
    pub data: Box<[u8]>,
    pub uid: u32,
    pub metatable: Option<TableId>,
}

impl Userdata {
    pub fn new(size: usize, uid: u32) -> Self {
        Userdata {
            data: vec![0u8; size].into_boxed_slice(),
            uid,
            metatable: None,
        }
    }

    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.len()
    }
}

/// Implemented by Rust types exposed to scripts as userdata — hand-written,
/// or generated by `vesper-derive`'s `#[derive(UserData)]`/`#[vesper_methods]`
/// (spec §3 "Userdata"). `push`/`borrow`/`borrow_mut` below are the one
/// generic implementation of the boxed-pointer-in-a-byte-payload trick every
/// derived type shares, so the macro itself only has to emit `get_field`/
/// `set_field` bodies (method dispatch is folded into `get_field`'s
/// fallthrough arm by `#[derive(UserData)]` — see `vesper-derive`).
pub trait UserDataType: Sized + 'static {
    const TYPE_NAME: &'static str;

    fn get_field(&self, state: &mut crate::vm::state::State, key: &str) -> crate::error::Result<Option<crate::value::Value>> {
        let _ = (state, key);
        Ok(None)
    }

    fn set_field(
        &mut self,
        state: &mut crate::vm::state::State,
        key: &str,
        value: crate::value::Value,
    ) -> crate::error::Result<bool> {
        let _ = (state, key, value);
        Ok(false)
    }
}

/// Box `value`, store the pointer in a fresh [`Userdata`]'s byte payload,
/// and attach `T`'s (lazily registered) metatable. The userdata's `__gc`
/// reclaims the box when the GC collects it.
pub fn push<T: UserDataType>(state: &mut crate::vm::state::State, value: T) -> crate::error::Result<()> {
    let mt = register_metatable::<T>(state)?;
    let uid = fnv1a_32(T::TYPE_NAME);
    let id = state.push_userdata(std::mem::size_of::<usize>(), uid)?;
    let ptr = Box::into_raw(Box::new(value));
    if let Some(bytes) = state.userdata_bytes_mut(id) {
        bytes.copy_from_slice(&(ptr as usize).to_ne_bytes());
    }
    state.set_userdata_metatable(id, Some(mt));
    Ok(())
}

/// Reborrow the `T` boxed inside the userdata at stack index `idx`.
///
/// # Safety contract
/// The returned reference is only valid until the userdata is garbage
/// collected (its `__gc` drops the box) — callers must not retain it past
/// the lifetime of the host-function call they borrowed it in, and must
/// not hold both a `borrow` and a `borrow_mut` of the same userdata at
/// once. This is the same aliasing discipline any Lua-style userdata
/// binding asks of its host callbacks.
pub fn borrow<T: UserDataType>(state: &crate::vm::state::State, idx: i64) -> Option<&'static T> {
    let crate::value::Value::Userdata(id) = state.get(idx) else {
        return None;
    };
    if state.userdata_uid(id)? != fnv1a_32(T::TYPE_NAME) {
        return None;
    }
    let bytes = state.heap.userdata.get(id.index())?.data.as_ref();
    let ptr = usize::from_ne_bytes(bytes[..8].try_into().ok()?) as *const T;
    Some(unsafe { &*ptr })
}

pub fn borrow_mut<T: UserDataType>(state: &mut crate::vm::state::State, idx: i64) -> Option<&'static mut T> {
    let crate::value::Value::Userdata(id) = state.get(idx) else {
        return None;
    };
    if state.userdata_uid(id)? != fnv1a_32(T::TYPE_NAME) {
        return None;
    }
    let bytes = state.userdata_bytes_mut(id)?;
    let ptr = usize::from_ne_bytes(bytes[..8].try_into().ok()?) as *mut T;
    Some(unsafe { &mut *ptr })
}

fn index_thunk<T: UserDataType>(state: &mut crate::vm::state::State) -> crate::error::Result<usize> {
    let key = state.to_string_value(1).unwrap_or_default();
    let this = borrow::<T>(state, 0)
        .ok_or_else(|| crate::error::Error::type_error(format!("not a {}", T::TYPE_NAME)))?;
    match this.get_field(state, &key)? {
        Some(v) => state.push(v),
        None => state.push_nil(),
    }
    Ok(1)
}

fn newindex_thunk<T: UserDataType>(state: &mut crate::vm::state::State) -> crate::error::Result<usize> {
    let key = state.to_string_value(1).unwrap_or_default();
    let value = state.get(2);
    let this = borrow_mut::<T>(state, 0)
        .ok_or_else(|| crate::error::Error::type_error(format!("not a {}", T::TYPE_NAME)))?;
    if !this.set_field(state, &key, value)? {
        return Err(crate::error::Error::type_error(format!(
            "field '{key}' not found on {}",
            T::TYPE_NAME
        )));
    }
    Ok(0)
}

fn gc_thunk<T: UserDataType>(state: &mut crate::vm::state::State) -> crate::error::Result<usize> {
    if let crate::value::Value::Userdata(id) = state.get(0) {
        let raw = state
            .userdata_bytes_mut(id)
            .and_then(|bytes| bytes[..8].try_into().ok())
            .map(usize::from_ne_bytes);
        if let Some(raw) = raw {
            unsafe { drop(Box::from_raw(raw as *mut T)) };
        }
    }
    Ok(0)
}

fn register_metatable<T: UserDataType>(state: &mut crate::vm::state::State) -> crate::error::Result<TableId> {
    if let Some(mt) = state.named_metatable(T::TYPE_NAME) {
        return Ok(mt);
    }
    let mt = state.heap.alloc_table(crate::value::table::Table::new())?;
    let set = |state: &mut crate::vm::state::State, name: &str, f: crate::value::CFunction| -> crate::error::Result<()> {
        let key = crate::value::Value::String(state.heap.alloc_string(crate::value::string::LuaStr::new(name))?);
        state.heap.write_barrier(crate::gc::GcRef::Table(mt), crate::value::Value::CFunction(f));
        if let Some(t) = state.heap.tables.get_mut(mt.index()) {
            t.raw_set(key, crate::value::Value::CFunction(f));
        }
        Ok(())
    };
    set(state, "__index", index_thunk::<T>)?;
    set(state, "__newindex", newindex_thunk::<T>)?;
    set(state, "__gc", gc_thunk::<T>)?;
    state.register_named_metatable(T::TYPE_NAME, mt);
    Ok(mt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_stable() {
        assert_eq!(fnv1a_32("Point"), fnv1a_32("Point"));
        assert_ne!(fnv1a_32("Point"), fnv1a_32("Vector"));
    }
}
