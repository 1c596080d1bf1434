//! Scenario 6: a write of four max-size lines produces exactly four
//! transmits on the target terminal, each completed before the next starts.

use mimir_kernel::hal::sim::{SimMachine, TERMINAL_MAX_LINE};
use mimir_kernel::hal::TerminalId;
use mimir_kernel::kernel::BootConfig;
use mimir_kernel::syscall::tty;
use mimir_kernel::trap::tty_transmit_trap;
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
            terminal_count: 2,
            init_program: "test/init",
            idle_program: "idle",
        },
    )
    .unwrap()
}

#[test]
fn four_max_line_chunks_transmit_in_order_and_wake_with_total_length() {
    let mut kernel = boot();
    let pid = kernel.running();
    let term = TerminalId(1);
    let data = vec![b'x'; 4 * TERMINAL_MAX_LINE];

    assert_eq!(tty::tty_write(&mut kernel, term, data.clone()).unwrap(), mimir_kernel::syscall::Outcome::Blocked);

    let mut completions = 0;
    for _ in 0..4 {
        kernel.machine.drain_transmit_completions(term, || completions += 1);
        tty_transmit_trap(&mut kernel, term);
    }

    assert_eq!(completions, 4);
    assert!(kernel.table.ready.contains(&pid));
    assert_eq!(kernel.table.get(pid).unwrap().user_context.regs[0], data.len() as i64);
    assert!(!kernel.terminals[1].busy);
}
