use dbt_core::{Arg, Context, InstIdx, LifeData};

/// Backward liveness analysis over the IR in `ctx`.
///
/// Only instructions that have side effects or whose result is used
/// contribute uses. Fills in `uses`, `first_use` and `last_use` on
/// every value and the per-operand "dies here" bits.
pub fn liveness_analysis(ctx: &mut Context) {
    ctx.reset_life();

    for i in (0..ctx.num_insts()).rev() {
        let at = InstIdx(i as u32);
        let inst = ctx.inst(at);
        // Uses of this value all come from later instructions, which
        // have already been visited.
        if !inst.is_live() {
            continue;
        }
        let args = inst.args;
        let nb_iargs = inst.iargs().len();

        let mut life = LifeData::default();
        for (n, arg) in args.iter().take(nb_iargs).enumerate() {
            let Arg::Value(v) = *arg else {
                continue;
            };
            let src = ctx.inst_mut(v);
            if src.last_use.is_none() {
                src.last_use = Some(at);
            }
            if src.last_use == Some(at) {
                life.set_dead(n);
            }
            src.first_use = Some(at);
            src.uses += 1;
        }
        ctx.inst_mut(at).life = life;
    }
}
