use std::io;

use clap::Parser;

use sfc::diag::Diagnostic;
use sfc::driver::{self, EmitTarget, GenOptions};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Human-readable scalar pseudo-code for one point.
    Pseudo,
    /// ISA-neutral vector pseudo-code with aligned loads and align steps.
    Vector,
}

#[derive(Parser, Debug)]
#[command(
    name = "sfc",
    version,
    about = "Stencil Fold Compiler — generates vector-folded SIMD stencil kernels from stencil definitions"
)]
struct Cli {
    /// Stencil name (example, iso3dfd, ave, awp)
    #[arg(short, long)]
    stencil: String,

    /// Stencil order, for stencils that use one
    #[arg(long, default_value_t = 2)]
    order: i64,

    /// Vector fold lengths, e.g. x=4,y=2
    #[arg(long, default_value = "")]
    fold: String,

    /// Cluster lengths, e.g. x=2
    #[arg(long, default_value = "")]
    cluster: String,

    /// Equation groups by grid-name substring, e.g. v=vel,s=stress
    #[arg(long = "eq", default_value = "")]
    eq_targets: String,

    /// Expression-size threshold above which temporaries are hoisted
    #[arg(long, default_value_t = 50)]
    expr_size: usize,

    /// Make the last fold dimension unit stride instead of the first
    #[arg(long)]
    last_unit_stride: bool,

    /// Allow simple unaligned loads (memory map MUST be compatible)
    #[arg(long)]
    allow_unaligned: bool,

    /// Combine commutative operations
    #[arg(long)]
    comb: bool,

    /// Disable common-subexpression elimination
    #[arg(long)]
    no_cse: bool,

    /// Output stage (repeatable); no stage runs analysis and stats only
    #[arg(long, value_enum)]
    emit: Vec<EmitStage>,

    /// Print generator phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let fold = ok_or_exit(driver::parse_dim_list(&cli.fold));
    let cluster = ok_or_exit(driver::parse_dim_list(&cli.cluster));

    let opts = GenOptions {
        stencil: cli.stencil,
        order: cli.order,
        fold,
        cluster,
        eq_targets: cli.eq_targets,
        expr_size: cli.expr_size,
        first_inner: !cli.last_unit_stride,
        allow_unaligned: cli.allow_unaligned,
        do_cse: !cli.no_cse,
        do_comb: cli.comb,
        emit: cli
            .emit
            .iter()
            .map(|e| match e {
                EmitStage::Pseudo => EmitTarget::Pseudo,
                EmitStage::Vector => EmitTarget::Vector,
            })
            .collect(),
        verbose: cli.verbose,
    };

    let mut out = io::stdout().lock();
    ok_or_exit(driver::run(&opts, &mut out));
}

fn ok_or_exit<T>(result: Result<T, Diagnostic>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("sfc: {}", e);
            std::process::exit(1);
        }
    }
}
