//! Lazy `dlsym(RTLD_NEXT, ...)` symbol resolution and caching (§4.7 step 1).
//!
//! Every hooked libc entry point needs to find "the next" implementation
//! of itself in the dynamic-loader chain exactly once, then reuse that
//! pointer for the rest of the process's life.

use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lazily-resolved, process-lifetime-cached real-symbol pointer.
/// `AtomicUsize` rather than `AtomicPtr<c_void>` so it's trivially
/// `Sync`able as a `static` without extra wrapper types.
pub struct RealSymbol {
    name: &'static str,
    cached: AtomicUsize,
}

impl RealSymbol {
    pub const fn new(name: &'static str) -> Self {
        RealSymbol {
            name,
            cached: AtomicUsize::new(0),
        }
    }

    /// Resolves (once) and returns the real symbol's address via
    /// `dlsym(RTLD_NEXT, name)`. Panics if the symbol genuinely cannot be
    /// found — that is a Fatal configuration condition (§7): a shim that
    /// cannot locate the real libc it wraps can never forward the call.
    pub fn get(&self) -> usize {
        let cached = self.cached.load(Ordering::Acquire);
        if cached != 0 {
            return cached;
        }
        let c_name = CString::new(self.name).expect("hook symbol name has no interior NUL");
        // SAFETY: dlsym with RTLD_NEXT is documented as safe to call with
        // any valid NUL-terminated name; the result is either a valid
        // function pointer or NULL.
        let resolved = unsafe { libc::dlsym(libc::RTLD_NEXT, c_name.as_ptr()) } as usize;
        if resolved == 0 {
            crate::logging::fatal_line(&format!("could not resolve real symbol for {}", self.name));
            unsafe { libc::_exit(1) };
        }
        self.cached.store(resolved, Ordering::Release);
        resolved
    }
}

/// Declares a `static` [`RealSymbol`] plus a typed accessor function
/// (`$accessor_fn`) that transmutes the cached address to the given
/// function-pointer type, avoiding repeating the transmute/call
/// boilerplate at every call site. Each hooked symbol gets its own
/// accessor name so a module hooking several members of one family (e.g.
/// `execve`, `execv`, `execvp`) doesn't collide.
#[macro_export]
macro_rules! real_symbol {
    ($static_name:ident, $accessor_fn:ident, $libc_name:literal, $fn_type:ty) => {
        static $static_name: $crate::interpose::real_symbols::RealSymbol =
            $crate::interpose::real_symbols::RealSymbol::new($libc_name);

        #[allow(dead_code)]
        fn $accessor_fn() -> $fn_type {
            let addr = $static_name.get();
            // SAFETY: `addr` was resolved via dlsym for a symbol this
            // module asserts has the given C signature.
            unsafe { std::mem::transmute::<usize, $fn_type>(addr) }
        }
    };
}
