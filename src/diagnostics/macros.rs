//! Diagnostic macros.

/// Emit a predefined diagnostic by code, optionally with formatted context.
///
/// ```rust,ignore
/// gx_emit!(GX101);
/// gx_emit!(GX002, "block {} offset {}", block_id, offset);
/// ```
#[macro_export]
macro_rules! gx_emit {
    ($code:ident) => {{
        $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
    }};
    ($code:ident, $($ctx:tt)+) => {{
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::$code,
            &format!($($ctx)+),
        );
    }};
}
