//! Memory views
//!
//! One typed view per element type is bound over the single linear-memory
//! buffer. The runtime builds its view constructors from the same table.

use wasmjs_ir::MemType;

/// A typed-array view over linear memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub mtype: MemType,
    /// Host constructor, e.g. `Int32Array`
    pub constructor: &'static str,
    /// Name the view is bound to inside the module, e.g. `I32`
    pub binding: &'static str,
}

/// Every view, in declaration order
pub const VIEWS: [View; 8] = [
    View { mtype: MemType::U8, constructor: "Uint8Array", binding: "U8" },
    View { mtype: MemType::I8, constructor: "Int8Array", binding: "I8" },
    View { mtype: MemType::U16, constructor: "Uint16Array", binding: "U16" },
    View { mtype: MemType::I16, constructor: "Int16Array", binding: "I16" },
    View { mtype: MemType::U32, constructor: "Uint32Array", binding: "U32" },
    View { mtype: MemType::I32, constructor: "Int32Array", binding: "I32" },
    View { mtype: MemType::F32, constructor: "Float32Array", binding: "F32" },
    View { mtype: MemType::F64, constructor: "Float64Array", binding: "F64" },
];

pub fn view_for(mtype: MemType) -> &'static View {
    match mtype {
        MemType::U8 => &VIEWS[0],
        MemType::I8 => &VIEWS[1],
        MemType::U16 => &VIEWS[2],
        MemType::I16 => &VIEWS[3],
        MemType::U32 => &VIEWS[4],
        MemType::I32 => &VIEWS[5],
        MemType::F32 => &VIEWS[6],
        MemType::F64 => &VIEWS[7],
    }
}

/// Finds a view by its constructor name
pub fn view_by_constructor(name: &str) -> Option<&'static View> {
    VIEWS.iter().find(|v| v.constructor == name)
}
