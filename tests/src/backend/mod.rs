mod code_region;
mod emitter;
mod regalloc;
