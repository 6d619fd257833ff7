// tests/property/guard.rs

use proptest::prelude::*;
use runguard::guard::{Admission, ConcurrencyGuard, SlotPermit};

#[derive(Debug, Clone)]
enum Op {
    /// Try to acquire the slot of job `n`.
    Acquire(usize),
    /// Drop the i-th held permit (modulo the number held).
    DropPermit(usize),
    /// Force-release job `n` by name.
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Acquire),
        any::<usize>().prop_map(Op::DropPermit),
        (0..3usize).prop_map(Op::Release),
    ]
}

fn job(n: usize) -> String {
    format!("job_{}", n)
}

proptest! {
    #[test]
    fn never_two_holders_and_release_is_idempotent(
        ops in proptest::collection::vec(op_strategy(), 1..64)
    ) {
        let guard = ConcurrencyGuard::new();
        let mut permits: Vec<SlotPermit> = Vec::new();
        // Model: which jobs are held right now.
        let mut held = [false; 3];

        for op in ops {
            match op {
                Op::Acquire(n) => {
                    let admitted = match guard.acquire(&job(n)) {
                        Admission::Admitted(p) => {
                            permits.push(p);
                            true
                        }
                        Admission::Rejected => false,
                    };
                    prop_assert_eq!(admitted, !held[n], "acquire of {} disagreed with model", job(n));
                    held[n] = true;
                }
                Op::DropPermit(i) => {
                    if !permits.is_empty() {
                        let permit = permits.remove(i % permits.len());
                        let n: usize = permit.job()[4..].parse().unwrap();
                        let freed = permit.release();
                        // A stale permit (its slot was force-released) frees nothing.
                        prop_assert_eq!(freed, held[n]);
                        held[n] = false;
                    }
                }
                Op::Release(n) => {
                    let freed = guard.release(&job(n));
                    prop_assert_eq!(freed, held[n]);
                    held[n] = false;
                    // Releasing again is a no-op.
                    prop_assert!(!guard.release(&job(n)));
                    // Drop permits for this job: they are stale now.
                    permits.retain(|p| p.job() != job(n));
                }
            }

            for n in 0..3 {
                prop_assert_eq!(guard.is_busy(&job(n)), held[n]);
            }
        }
    }
}
