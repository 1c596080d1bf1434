//! Demo harness: boots the kernel over the software-simulated machine and
//! scripts one end-to-end scenario against it, printing the resulting
//! process/queue state. Not part of the tested core (see SPEC_FULL.md §10.4).

use clap::Parser;
use log::info;

use mimir_kernel::hal::sim::SimMachine;
use mimir_kernel::kernel::BootConfig;
use mimir_kernel::syscall::process;
use mimir_kernel::Kernel;

#[derive(Parser)]
#[command(name = "mimir", about = "Teaching microkernel demo harness")]
struct Args {
    /// Initial user program to boot into.
    #[arg(long, default_value = "test/init")]
    program: String,

    /// Physical memory size, in pages.
    #[arg(long, default_value_t = 512)]
    memory_pages: usize,

    /// Enable debug logging.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let machine = SimMachine::with_default_programs(args.memory_pages);
    let mut kernel = Kernel::boot(
        machine,
        BootConfig {
            frame_count: args.memory_pages,
            kernel_region_pages: 32,
            kernel_text_pages: 2,
            kernel_heap_pages: 4,
            user_region_pages: 64,
            terminal_count: 2,
            init_program: &args.program,
            idle_program: "idle",
        },
    )
    .expect("boot failed");

    info!("booted: running pid={:?} ready={:?}", kernel.running(), kernel.table.ready);

    let outcome = process::fork(&mut kernel).expect("fork failed");
    info!("init forked: {outcome:?}");

    println!("pid                 = {:?}", kernel.running());
    println!("ready queue         = {:?}", kernel.table.ready);
    println!("blocked queue       = {:?}", kernel.table.blocked);
    println!("defunct queue       = {:?}", kernel.table.defunct);
    println!("frames in use       = {}", kernel.frames.used_count());
}
