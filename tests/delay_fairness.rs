//! Scenario 3: two delayed PCBs both wake exactly `n` ticks later.

use mimir_kernel::hal::sim::SimMachine;
use mimir_kernel::hal::ProcessId;
use mimir_kernel::kernel::BootConfig;
use mimir_kernel::pcb::BlockReason;
use mimir_kernel::syscall::{process, Outcome};
use mimir_kernel::trap::clock_handler;
use mimir_kernel::Kernel;

fn boot() -> Kernel<SimMachine> {
    let machine = SimMachine::with_default_programs(256);
    Kernel::boot(
        machine,
        BootConfig {
            frame_count: 256,
            kernel_region_pages: 32,
            kernel_text_pages: 2,
            kernel_heap_pages: 2,
            user_region_pages: 32,
            terminal_count: 1,
            init_program: "test/init",
            idle_program: "idle",
        },
    )
    .unwrap()
}

#[test]
fn two_delayed_processes_wake_exactly_ten_ticks_later() {
    let mut kernel = boot();
    let a = kernel.running();
    let Outcome::Value(b_raw) = process::fork(&mut kernel).unwrap() else { panic!() };
    let b = ProcessId(b_raw as u32);

    kernel.table.running = Some(a);
    assert_eq!(process::delay(&mut kernel, 10).unwrap(), Outcome::Blocked);
    kernel.table.running = Some(b);
    assert_eq!(process::delay(&mut kernel, 10).unwrap(), Outcome::Blocked);

    for _ in 0..9 {
        clock_handler(&mut kernel);
    }
    assert_eq!(kernel.table.get(a).unwrap().block_reason, BlockReason::Delay(1));
    assert_eq!(kernel.table.get(b).unwrap().block_reason, BlockReason::Delay(1));

    clock_handler(&mut kernel);
    assert_eq!(kernel.table.get(a).unwrap().block_reason, BlockReason::None);
    assert_eq!(kernel.table.get(b).unwrap().block_reason, BlockReason::None);
    assert!(kernel.table.ready.contains(&a));
    assert!(kernel.table.ready.contains(&b));
}
