//! Scenario 2: producer writes, consumer reads the same bytes in order.

use mimir_kernel::hal::sim::SimMachine;
use mimir_kernel::hal::ObjectId;
use mimir_kernel::kernel::BootConfig;
use mimir_kernel::syscall::{pipe, Outcome};
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
fn write_hello_then_read_returns_same_bytes_in_order() {
    let mut kernel = boot();
    let Outcome::Value(id_raw) = pipe::pipe_init(&mut kernel).unwrap() else { panic!() };
    let id = ObjectId(id_raw as i32);

    assert_eq!(pipe::pipe_write(&mut kernel, id, b"hello").unwrap(), Outcome::Value(5));
    let outcome = pipe::pipe_read(&mut kernel, id, 10).unwrap();
    assert_eq!(outcome, Outcome::Value(5));

    let pid = kernel.running();
    assert_eq!(kernel.table.get(pid).unwrap().pending_io.as_ref().unwrap().result, b"hello");
}

#[test]
fn reclaim_refuses_while_a_reader_is_blocked() {
    let mut kernel = boot();
    let Outcome::Value(id_raw) = pipe::pipe_init(&mut kernel).unwrap() else { panic!() };
    let id = ObjectId(id_raw as i32);

    assert_eq!(pipe::pipe_read(&mut kernel, id, 10).unwrap(), Outcome::Blocked);
    let err = mimir_kernel::syscall::sync::reclaim(&mut kernel, id).unwrap_err();
    assert_eq!(err, mimir_kernel::error::KernelError::Pipe(mimir_kernel::error::PipeError::ReaderBlocked));
}
