pub mod block;
pub mod context;
pub mod dump;
pub mod guest;
pub mod ir_builder;
pub mod memory;
pub mod op;
pub mod opcode;
pub mod state;
pub mod types;

pub use block::{BlockState, ExitRecord, JitBlock, MAX_BLOCK_EXITS};
pub use context::Context;
pub use guest::{GuestInsn, InterpFn, Lowered};
pub use memory::GuestMemory;
pub use op::{Arg, Inst, InstIdx, LifeData, MAX_INST_ARGS};
pub use opcode::{OpDef, OpFlags, Opcode, OPCODE_DEFS};
pub use state::GuestState;
pub use types::{Cond, Location, MemSize, RegSet};
