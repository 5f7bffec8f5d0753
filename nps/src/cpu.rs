//! CPU snapshots: a method table and one call tree per thread.
//!
//! The (inflated) payload of a CPU snapshot is laid out as such:
//!
//! ```ignore
//!    version                     int
//!    begin time                  long
//!    time taken                  long
//!    collecting two time stamps  boolean
//!    method count                int
//!    methods                     (class name: UTF, method name: UTF, signature: UTF) * method count
//!    thread count                int
//!    threads                     Thread * thread count
//! ```
//!
//! where each thread is:
//!
//! ```ignore
//!    thread id                   int
//!    thread name                 UTF
//!    collecting two time stamps  boolean
//!    call tree length            int
//!    call tree                   [u8] * call tree length, see `call_tree.rs`
//!    node size                   int
//!    gross time (abs, CPU)       long, long
//!    injected code time          double, double
//!    pure time (abs, CPU)        long, long
//!    net time (0, 1)             long, long
//!    total invocations           long
//!    display thread CPU time     boolean
//! ```

use crate::{CallTree, CallTreeNode, PointerWidth, Reader, Result, Snapshot};

/// Index into [`CpuSnapshot::methods`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MethodId(pub u16);

impl MethodId {
    #[inline]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// An instrumented method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Method {
    /// e.g. `java.lang.Thread`
    pub class_name: String,

    /// e.g. `run`
    pub method_name: String,

    /// JVM descriptor, e.g. `()V`
    pub method_signature: String,
}

impl Method {
    /// `class_name.method_name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

/// Profile data of one thread.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Thread {
    pub thread_id: i32,
    pub thread_name: String,

    /// The thread's own copy of [`CpuSnapshot::collecting_two_time_stamps`].
    ///
    /// Informational only: the snapshot-level flag decides the call tree layout.
    pub collecting_two_time_stamps: bool,

    pub node_size: i32,
    pub whole_graph_gross_time_abs: i64,
    pub whole_graph_gross_time_thread_cpu: i64,
    pub time_in_injected_code_in_abs_counts: f64,
    pub time_in_injected_code_in_thread_cpu_counts: f64,
    pub whole_graph_pure_time_abs: i64,
    pub whole_graph_pure_time_thread_cpu: i64,
    pub whole_graph_net_time0: i64,
    pub whole_graph_net_time1: i64,
    pub total_inv_no: i64,
    pub display_whole_thread_cpu_time: bool,

    pub call_tree: CallTree,
}

/// A decoded CPU snapshot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuSnapshot {
    pub version: i32,

    /// When profiling started, in milliseconds since the unix epoch.
    pub begin_time: i64,

    /// When the snapshot was taken, in milliseconds since the unix epoch.
    pub time_taken: i64,

    /// If set, every call tree node has both wall clock and thread CPU times.
    pub collecting_two_time_stamps: bool,

    /// [`MethodId`] is the index into this.
    pub methods: Vec<Method>,

    pub threads: Vec<Thread>,
}

impl CpuSnapshot {
    /// Decode an inflated CPU snapshot payload.
    ///
    /// # Errors
    /// [`crate::Error::OutOfBounds`] or [`crate::Error::InvalidLength`] if the payload
    /// is truncated or inconsistent, or any error from [`CallTree::decode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);

        let version = reader.read_i32()?;
        let begin_time = reader.read_i64_words()?;
        let time_taken = reader.read_i64_words()?;
        let collecting_two_time_stamps = reader.read_bool()?;

        let num_methods = reader.read_len()?;
        // Every method needs at least 6 bytes, so don't trust the count for preallocation:
        let mut methods = Vec::with_capacity(num_methods.min(reader.remaining() / 6));
        for _ in 0..num_methods {
            methods.push(Method {
                class_name: reader.read_utf()?,
                method_name: reader.read_utf()?,
                method_signature: reader.read_utf()?,
            });
        }

        let num_threads = reader.read_len()?;
        let mut threads = Vec::with_capacity(num_threads.min(reader.remaining() / 64));
        for _ in 0..num_threads {
            threads.push(read_thread(&mut reader, collecting_two_time_stamps)?);
        }

        log::debug!(
            "Decoded CPU snapshot v{version}: {} methods, {} threads",
            methods.len(),
            threads.len()
        );

        Ok(Self {
            version,
            begin_time,
            time_taken,
            collecting_two_time_stamps,
            methods,
            threads,
        })
    }

    pub fn method(&self, id: MethodId) -> Option<&Method> {
        self.methods.get(id.index())
    }

    /// The method a call tree node refers to.
    pub fn resolve(&self, node: &CallTreeNode) -> Option<&Method> {
        self.method(node.method_id)
    }

    pub fn thread_by_name(&self, name: &str) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.thread_name == name)
    }
}

/// Matches [`crate::DecodeFn`], for registering CPU snapshots.
pub(crate) fn decode_snapshot(payload: &[u8]) -> Result<Snapshot> {
    CpuSnapshot::decode(payload).map(Snapshot::Cpu)
}

fn read_thread(reader: &mut Reader<'_>, collecting_two_time_stamps: bool) -> Result<Thread> {
    let thread_id = reader.read_i32()?;
    let thread_name = reader.read_utf()?;
    let thread_two_time_stamps = reader.read_bool()?;
    if thread_two_time_stamps != collecting_two_time_stamps {
        log::warn!(
            "Thread {thread_id} ({thread_name:?}) collects two time stamps: {thread_two_time_stamps}, \
             but the snapshot says {collecting_two_time_stamps}. Using the snapshot setting."
        );
    }

    let call_tree_len = reader.read_len()?;
    let call_tree_bytes = reader.read_slice(call_tree_len)?;

    let node_size = reader.read_i32()?;
    let whole_graph_gross_time_abs = reader.read_i64_words()?;
    let whole_graph_gross_time_thread_cpu = reader.read_i64_words()?;
    let time_in_injected_code_in_abs_counts = reader.read_f64()?;
    let time_in_injected_code_in_thread_cpu_counts = reader.read_f64()?;
    let whole_graph_pure_time_abs = reader.read_i64_words()?;
    let whole_graph_pure_time_thread_cpu = reader.read_i64_words()?;
    let whole_graph_net_time0 = reader.read_i64_words()?;
    let whole_graph_net_time1 = reader.read_i64_words()?;
    let total_inv_no = reader.read_i64_words()?;
    let display_whole_thread_cpu_time = reader.read_bool()?;

    let call_tree = CallTree::decode(
        call_tree_bytes,
        collecting_two_time_stamps,
        PointerWidth::for_tree_len(call_tree_bytes.len()),
    )?;
    log::debug!(
        "Thread {thread_id} ({thread_name:?}): {} call tree nodes from {call_tree_len} bytes",
        call_tree.len()
    );

    Ok(Thread {
        thread_id,
        thread_name,
        collecting_two_time_stamps: thread_two_time_stamps,
        node_size,
        whole_graph_gross_time_abs,
        whole_graph_gross_time_thread_cpu,
        time_in_injected_code_in_abs_counts,
        time_in_injected_code_in_thread_cpu_counts,
        whole_graph_pure_time_abs,
        whole_graph_pure_time_thread_cpu,
        whole_graph_net_time0,
        whole_graph_net_time1,
        total_inv_no,
        display_whole_thread_cpu_time,
        call_tree,
    })
}

#[test]
fn method_full_name() {
    let method = Method {
        class_name: "java.lang.Thread".to_owned(),
        method_name: "run".to_owned(),
        method_signature: "()V".to_owned(),
    };
    assert_eq!(method.full_name(), "java.lang.Thread.run");
}

#[test]
fn empty_snapshot() {
    let mut payload = vec![];
    payload.extend(3_i32.to_be_bytes()); // version
    payload.extend([0, 0, 0, 0, 0, 0, 0, 10]); // begin time
    payload.extend([0, 0, 0, 0, 0, 0, 0, 20]); // time taken
    payload.push(1); // two time stamps
    payload.extend(0_i32.to_be_bytes()); // methods
    payload.extend(0_i32.to_be_bytes()); // threads

    let snapshot = CpuSnapshot::decode(&payload).unwrap();
    assert_eq!(snapshot.version, 3);
    assert_eq!(snapshot.begin_time, 10);
    assert_eq!(snapshot.time_taken, 20);
    assert!(snapshot.collecting_two_time_stamps);
    assert!(snapshot.methods.is_empty());
    assert!(snapshot.threads.is_empty());
}

#[test]
fn huge_method_count_fails_without_allocating() {
    let mut payload = vec![];
    payload.extend(1_i32.to_be_bytes());
    payload.extend([0; 16]);
    payload.push(0);
    payload.extend(i32::MAX.to_be_bytes());
    assert!(matches!(
        CpuSnapshot::decode(&payload),
        Err(crate::Error::OutOfBounds { .. })
    ));
}

#[test]
fn negative_thread_count() {
    let mut payload = vec![];
    payload.extend(1_i32.to_be_bytes());
    payload.extend([0; 16]);
    payload.push(0);
    payload.extend(0_i32.to_be_bytes());
    payload.extend((-1_i32).to_be_bytes());
    assert!(matches!(
        CpuSnapshot::decode(&payload),
        Err(crate::Error::InvalidLength(-1))
    ));
}
