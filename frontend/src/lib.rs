//! Guest frontends.
//!
//! A frontend decodes guest instructions, lowers them to IR or
//! straight to host code, and supplies the interpreter used for
//! everything it does not lower. The engine reaches it through the
//! [`dbt_exec::Guest`] trait.

pub mod ppc;

pub use ppc::PpcGuest;
