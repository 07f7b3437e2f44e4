//! Raw FFI bindings to llama.cpp, generated at build time from the
//! `llama.cpp/` checkout next to this crate (see build.rs). Nothing here is
//! safe to call directly; `nox-llama` holds the safe wrappers.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(rustdoc::broken_intra_doc_links)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
