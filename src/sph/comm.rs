use std::any::Any;
use std::sync::{Arc, Barrier, Mutex};

/// Collective primitives the tree-walk driver needs from the process
/// group: an all-to-all count exchange, a pairwise typed payload
/// exchange, and an integer sum reduction.
///
/// All three are collective: every rank must call them in the same
/// order with matching generic types, as the driver's bulk-synchronous
/// structure guarantees.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn n_ranks(&self) -> usize;

    /// `send[d]` is the number of queries this rank wants to ship to
    /// rank d; the result holds the counts every peer wants to ship
    /// here.
    fn alltoall_counts(&mut self, send: &[u64]) -> Vec<u64>;

    /// Pairwise sendrecv. `send[d]` goes to rank d; the result's entry s
    /// holds what rank s sent here. Entry ordering within each vector is
    /// preserved, which the driver relies on to match results back to
    /// exported queries.
    fn exchange<T: Clone + Send + 'static>(&mut self, send: Vec<Vec<T>>) -> Vec<Vec<T>>;

    fn allreduce_sum_i64(&mut self, value: i64) -> i64;
}

/// The single-process communicator: everything is a self-loop.
#[derive(Debug, Default)]
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn alltoall_counts(&mut self, send: &[u64]) -> Vec<u64> {
        send.to_vec()
    }

    fn exchange<T: Clone + Send + 'static>(&mut self, send: Vec<Vec<T>>) -> Vec<Vec<T>> {
        send
    }

    fn allreduce_sum_i64(&mut self, value: i64) -> i64 {
        value
    }
}

struct ThreadCluster {
    n: usize,
    barrier: Barrier,
    counts: Mutex<Vec<Vec<u64>>>,
    values: Mutex<Vec<i64>>,
    /// n×n mailbox matrix; slot s*n+d carries the payload from rank s to
    /// rank d during one exchange.
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
}

/// In-process communicator running one rank per thread, synchronized
/// with barriers. Mirrors the message-passing contract closely enough
/// to exercise the export/import machinery of the tree walk without an
/// actual process group.
pub struct ThreadComm {
    rank: usize,
    cluster: Arc<ThreadCluster>,
}

impl ThreadComm {
    /// Creates communicators for `n` ranks. Each returned handle must be
    /// moved to its own thread; the collectives block until all ranks
    /// participate.
    pub fn cluster(n: usize) -> Vec<ThreadComm> {
        assert!(n > 0);
        let cluster = Arc::new(ThreadCluster {
            n,
            barrier: Barrier::new(n),
            counts: Mutex::new(vec![Vec::new(); n]),
            values: Mutex::new(vec![0; n]),
            slots: Mutex::new((0..n * n).map(|_| None).collect()),
        });
        (0..n)
            .map(|rank| ThreadComm {
                rank,
                cluster: Arc::clone(&cluster),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.cluster.n
    }

    fn alltoall_counts(&mut self, send: &[u64]) -> Vec<u64> {
        assert_eq!(send.len(), self.cluster.n);
        {
            let mut counts = self.cluster.counts.lock().unwrap();
            counts[self.rank] = send.to_vec();
        }
        self.cluster.barrier.wait();
        let result = {
            let counts = self.cluster.counts.lock().unwrap();
            (0..self.cluster.n).map(|s| counts[s][self.rank]).collect()
        };
        self.cluster.barrier.wait();
        result
    }

    fn exchange<T: Clone + Send + 'static>(&mut self, send: Vec<Vec<T>>) -> Vec<Vec<T>> {
        let n = self.cluster.n;
        assert_eq!(send.len(), n);
        {
            let mut slots = self.cluster.slots.lock().unwrap();
            for (d, payload) in send.into_iter().enumerate() {
                slots[self.rank * n + d] = Some(Box::new(payload));
            }
        }
        self.cluster.barrier.wait();
        let mut received = Vec::with_capacity(n);
        {
            let mut slots = self.cluster.slots.lock().unwrap();
            for s in 0..n {
                let boxed = slots[s * n + self.rank].take().expect("peer skipped the exchange");
                let payload = boxed
                    .downcast::<Vec<T>>()
                    .expect("mismatched payload type in exchange");
                received.push(*payload);
            }
        }
        self.cluster.barrier.wait();
        received
    }

    fn allreduce_sum_i64(&mut self, value: i64) -> i64 {
        {
            let mut values = self.cluster.values.lock().unwrap();
            values[self.rank] = value;
        }
        self.cluster.barrier.wait();
        let total = {
            let values = self.cluster.values.lock().unwrap();
            values.iter().sum()
        };
        self.cluster.barrier.wait();
        total
    }
}
