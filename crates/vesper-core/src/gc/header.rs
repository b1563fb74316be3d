//! GC object header (spec §3 "GC object header", §4.5).
//!
//! Every heap-allocated object's arena slot carries one of these. Bits are
//! packed the way the teacher's `gc/gc_object.rs` packs Lua 5.5's
//! `GCObject.marked` byte, trimmed to the three-phase (Idle/Mark/Sweep)
//! collector Vesper implements (no generational age bits).

/// Tri-color mark. The two whites alternate each cycle so sweep can tell
/// survivors of the current cycle from garbage of the previous one without
/// a full reset pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White0,
    White1,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub color: Color,
    /// Set once a userdata with a `__gc` metamethod has been queued for
    /// finalization, so sweep does not queue it twice.
    pub finalized: bool,
}

impl GcHeader {
    pub fn new(white: Color) -> Self {
        GcHeader {
            color: white,
            finalized: false,
        }
    }

    pub fn is_white(&self) -> bool {
        matches!(self.color, Color::White0 | Color::White1)
    }

    pub fn is_dead(&self, current_white: Color) -> bool {
        self.is_white() && self.color != current_white
    }
}
