//! Frame accounting across process lifetimes. Lives alone in this
//! binary so nothing else touches the user pool while it measures.

mod common;

use minos::mm;
use minos::process;
use minos::syscall::SyscallNumber;
use minos::thread::TID_ERROR;
use minos::usermode::{self, UserContext};

const EXIT: u32 = SyscallNumber::Exit as u32;

#[test]
fn frames_are_returned_and_exhaustion_rolls_back_the_launch() {
    common::install_executable("pool-prog");
    usermode::install_program("pool-prog", |ctx: &mut UserContext| {
        ctx.syscall(EXIT, &[0]);
    });

    // A comfortable pool: launch, reap, and expect every frame back.
    mm::configure_user_pool(8);
    let (code, _) = common::run_kernel("pool-main", b"", || {
        assert_eq!(mm::user_pool_in_use(), 0);
        let tid = process::execute("pool-prog");
        assert_eq!(process::wait(tid), 0);
        assert_eq!(mm::user_pool_in_use(), 0);
    });
    assert_eq!(code, 0);

    // One frame is enough for the stack but not the image: the load
    // reports failure, the parent sees the error tid, and the partial
    // address space is fully released.
    mm::configure_user_pool(1);
    let (code, out) = common::run_kernel("oom-main", b"", || {
        assert_eq!(process::execute("pool-prog"), TID_ERROR);
        // The failed child's teardown races this check; poll for it.
        assert!(common::eventually(|| mm::user_pool_in_use() == 0));
    });
    assert_eq!(code, 0);
    // The doomed child still went through the ordinary exit path.
    assert!(
        out.contains("pool-prog: exit(-1)\n"),
        "console output: {out:?}"
    );

    // Leave a sane pool behind for any later use of this binary.
    mm::configure_user_pool(mm::USER_POOL_DEFAULT_FRAMES);
}
