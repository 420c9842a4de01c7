//! Fine-grained reactive dataflow primitives.
//!
//! `reflux` lets you declare values whose recomputation is driven
//! automatically by changes to upstream inputs: mutable sources ([`var`]),
//! pure computed values ([`calc`]) and side-effect actions ([`action`]),
//! connected by a cycle-checked dependency graph. The scheduler propagates
//! changes in topological order, so even when the graph has diamonds each
//! affected node recomputes at most once per update; [`batch`] extends that
//! guarantee across several source writes at once.
//!
//! # Example
//! ```
//! use reflux::*;
//!
//! let _ = create_graph(|| {
//!     let width = var(3);
//!     let height = var(4);
//!     let area = calc_on((&width, &height), |w: i32, h: i32| w * h);
//!     assert_eq!(area.get(), 12);
//!
//!     width.set(5);
//!     assert_eq!(area.get(), 20);
//!
//!     // Group writes so `area` recomputes only once.
//!     batch_execute({
//!         let (width, height) = (width.clone(), height.clone());
//!         move || {
//!             width.set(10);
//!             height.set(10);
//!         }
//!     })
//!     .unwrap();
//!     assert_eq!(area.get(), 100);
//! });
//! ```
//!
//! # Handles and liveness
//!
//! Handles ([`Var`], [`ReadVar`], [`Calc`]) are reference counted; when the
//! last handle to a node drops, the node's [`Invalidate`] policy decides
//! whether it is closed, kept, or frozen at its last value. Recomputation is
//! gated per node by a [`Trigger`] policy: always, on value change (the
//! default), or through a custom filter predicate.
//!
//! # Threads
//!
//! The engine is thread-safe throughout: handles may be sent and shared
//! freely, individual writes are linearizable, and batches commit atomically
//! with respect to reads that happen after `execute` returns. Notifications
//! run inline on the thread that performs the triggering write.

#![warn(missing_docs)]

mod actions;
mod batch;
mod cache;
mod calcs;
mod error;
mod expr;
mod fields;
mod graph;
mod node;
mod policy;
mod threading;
mod utils;
mod vars;

pub use actions::*;
pub use batch::*;
pub use cache::CacheStats;
pub use calcs::*;
pub use error::*;
pub use expr::*;
pub use fields::*;
pub use graph::{create_graph, graph_stats, untrack, GraphHandle, GraphStats};
pub use node::NodeId;
pub use policy::*;
pub use threading::is_multi_threaded;
pub use utils::*;
pub use vars::*;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use crate::*;

    #[test]
    fn cross_thread_writes_propagate() {
        let _ = create_graph(|| {
            let counter = var(0usize);
            let seen = Arc::new(AtomicUsize::new(0));
            let _watch = action_on((&counter,), {
                let seen = seen.clone();
                move |n: usize| {
                    seen.store(n, Ordering::SeqCst);
                }
            });

            let writer = {
                let counter = counter.clone();
                thread::spawn(move || {
                    for i in 1..=100 {
                        counter.set(i);
                    }
                })
            };
            writer.join().unwrap();

            assert!(is_multi_threaded());
            assert_eq!(counter.get(), 100);
            assert_eq!(seen.load(Ordering::SeqCst), 100);
        });
    }

    #[test]
    fn concurrent_writers_stay_consistent() {
        let _ = create_graph(|| {
            let a = var(0i64);
            let b = var(0i64);
            let sum = calc_on((&a, &b), |x: i64, y: i64| x + y);

            let threads: Vec<_> = (0..4)
                .map(|t| {
                    let (a, b) = (a.clone(), b.clone());
                    thread::spawn(move || {
                        for i in 0..50 {
                            if t % 2 == 0 {
                                a.set(i);
                            } else {
                                b.set(i);
                            }
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            // A final write at quiescence recomputes from current values.
            a.set(1000);
            assert_eq!(sum.get(), 1000 + b.get());
        });
    }
}
