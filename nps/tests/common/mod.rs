#![allow(dead_code)]

//! Builders for snapshot files, used to feed the decoder known input.

use byteorder::{BigEndian as BE, WriteBytesExt as _};
use nps::PointerWidth;
use std::io::Write as _;

pub const SETTINGS: &str = "profiler.cpu.profiling.type=0\nprofiler.thread.cpu.timer=true\n";

/// A call tree node to encode, with its children inline.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub method_id: u16,
    pub n_calls: u32,
    pub time0: (u64, u64),
    pub time1: (u64, u64),
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(method_id: u16, n_calls: u32, time0: (u64, u64)) -> Self {
        Self {
            method_id,
            n_calls,
            time0,
            time1: (time0.0 / 2, time0.1 / 2),
            children: vec![],
        }
    }

    pub fn with_children(mut self, children: Vec<NodeSpec>) -> Self {
        self.children = children;
        self
    }
}

pub fn write_u40(bytes: &mut Vec<u8>, value: u64) {
    assert!(value <= nps::packed::MAX_U40, "{value} does not fit in 40 bits");
    bytes.write_u8((value >> 32) as u8).unwrap();
    bytes.write_u32::<BE>(value as u32).unwrap();
}

pub fn write_long(bytes: &mut Vec<u8>, value: i64) {
    bytes.write_i32::<BE>((value >> 32) as i32).unwrap();
    bytes.write_u32::<BE>(value as u32).unwrap();
}

pub fn write_utf(bytes: &mut Vec<u8>, text: &str) {
    bytes.write_u16::<BE>(text.len() as u16).unwrap();
    bytes.extend(text.as_bytes());
}

pub fn write_pointer(bytes: &mut [u8], at: usize, pointer: usize, width: PointerWidth) {
    let pointer = pointer as u32;
    match width {
        PointerWidth::U24 => bytes[at..at + 3].copy_from_slice(&pointer.to_be_bytes()[1..]),
        PointerWidth::U32 => bytes[at..at + 4].copy_from_slice(&pointer.to_be_bytes()),
    }
}

/// Writes the node header and child count, plus zeroed room for the child pointers.
/// Returns the offset of the first child pointer.
pub fn write_node_header(
    bytes: &mut Vec<u8>,
    node: &NodeSpec,
    two_time_stamps: bool,
    width: PointerWidth,
) -> usize {
    bytes.write_u16::<BE>(node.method_id).unwrap();
    bytes.write_u32::<BE>(node.n_calls).unwrap();
    write_u40(bytes, node.time0.0);
    write_u40(bytes, node.time0.1);
    if two_time_stamps {
        write_u40(bytes, node.time1.0);
        write_u40(bytes, node.time1.1);
    }
    bytes.write_u16::<BE>(node.children.len() as u16).unwrap();
    let pointers = bytes.len();
    bytes.resize(pointers + node.children.len() * width.bytes(), 0);
    pointers
}

/// Lays out `root` at offset 0, each node directly followed by its subtrees.
pub fn encode_tree(root: &NodeSpec, two_time_stamps: bool, width: PointerWidth) -> Vec<u8> {
    fn encode_node(
        bytes: &mut Vec<u8>,
        node: &NodeSpec,
        two_time_stamps: bool,
        width: PointerWidth,
    ) -> usize {
        let offset = bytes.len();
        let pointers = write_node_header(bytes, node, two_time_stamps, width);
        for (i, child) in node.children.iter().enumerate() {
            let child_offset = encode_node(bytes, child, two_time_stamps, width);
            write_pointer(bytes, pointers + i * width.bytes(), child_offset, width);
        }
        offset
    }

    let mut bytes = vec![];
    encode_node(&mut bytes, root, two_time_stamps, width);
    bytes
}

/// A thread record to encode.
#[derive(Clone, Debug)]
pub struct ThreadSpec {
    pub thread_id: i32,
    pub thread_name: String,
    pub collecting_two_time_stamps: bool,
    pub call_tree: Vec<u8>,
}

impl ThreadSpec {
    pub fn new(thread_id: i32, thread_name: &str, two_time_stamps: bool, call_tree: Vec<u8>) -> Self {
        Self {
            thread_id,
            thread_name: thread_name.to_owned(),
            collecting_two_time_stamps: two_time_stamps,
            call_tree,
        }
    }

    /// Summary fields get values derived from the thread id, see [`assert_summary`].
    fn write(&self, bytes: &mut Vec<u8>) {
        let id = i64::from(self.thread_id);
        bytes.write_i32::<BE>(self.thread_id).unwrap();
        write_utf(bytes, &self.thread_name);
        bytes.write_u8(u8::from(self.collecting_two_time_stamps)).unwrap();
        bytes.write_i32::<BE>(self.call_tree.len() as i32).unwrap();
        bytes.extend(&self.call_tree);
        bytes.write_i32::<BE>(26).unwrap(); // node size
        write_long(bytes, id * 1_000 + 1); // gross abs
        write_long(bytes, (1 << 33) + 2); // gross thread CPU
        bytes.write_f64::<BE>(0.5).unwrap();
        bytes.write_f64::<BE>(-1.25).unwrap();
        write_long(bytes, id * 1_000 + 3); // pure abs
        write_long(bytes, id * 1_000 + 4); // pure thread CPU
        write_long(bytes, -5); // net 0
        write_long(bytes, id * 1_000 + 6); // net 1
        write_long(bytes, 7); // invocations
        bytes.write_u8(1).unwrap(); // display thread CPU time
    }
}

pub fn assert_summary(thread: &nps::Thread) {
    let id = i64::from(thread.thread_id);
    assert_eq!(thread.node_size, 26);
    assert_eq!(thread.whole_graph_gross_time_abs, id * 1_000 + 1);
    assert_eq!(thread.whole_graph_gross_time_thread_cpu, (1 << 33) + 2);
    assert_eq!(thread.time_in_injected_code_in_abs_counts, 0.5);
    assert_eq!(thread.time_in_injected_code_in_thread_cpu_counts, -1.25);
    assert_eq!(thread.whole_graph_pure_time_abs, id * 1_000 + 3);
    assert_eq!(thread.whole_graph_pure_time_thread_cpu, id * 1_000 + 4);
    assert_eq!(thread.whole_graph_net_time0, -5);
    assert_eq!(thread.whole_graph_net_time1, id * 1_000 + 6);
    assert_eq!(thread.total_inv_no, 7);
    assert!(thread.display_whole_thread_cpu_time);
}

pub const METHODS: [(&str, &str, &str); 3] = [
    ("java.lang.Thread", "run", "()V"),
    ("com.example.Worker", "process", "(Ljava/lang/String;)I"),
    ("com.example.Worker", "flush", "()V"),
];

/// An inflated CPU snapshot payload.
pub fn cpu_payload(
    two_time_stamps: bool,
    methods: &[(&str, &str, &str)],
    threads: &[ThreadSpec],
) -> Vec<u8> {
    let mut bytes = vec![];
    bytes.write_i32::<BE>(1).unwrap(); // version
    write_long(&mut bytes, 1_700_000_000_000); // begin time
    write_long(&mut bytes, 1_700_000_060_000); // time taken
    bytes.write_u8(u8::from(two_time_stamps)).unwrap();
    bytes.write_i32::<BE>(methods.len() as i32).unwrap();
    for (class_name, method_name, signature) in methods {
        write_utf(&mut bytes, class_name);
        write_utf(&mut bytes, method_name);
        write_utf(&mut bytes, signature);
    }
    bytes.write_i32::<BE>(threads.len() as i32).unwrap();
    for thread in threads {
        thread.write(&mut bytes);
    }
    bytes
}

pub fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// A snapshot file, declaring `uncompressed_len` as the payload size.
pub fn container_with(
    snapshot_type: i32,
    payload: &[u8],
    uncompressed_len: i32,
    settings: &str,
) -> Vec<u8> {
    let compressed = zlib(payload);
    let mut bytes = nps::MAGIC.to_vec();
    bytes.extend([1, 2]); // version
    bytes.write_i32::<BE>(snapshot_type).unwrap();
    bytes.write_i32::<BE>(compressed.len() as i32).unwrap();
    bytes.write_i32::<BE>(uncompressed_len).unwrap();
    bytes.extend(&compressed);
    bytes.write_i32::<BE>(settings.len() as i32).unwrap();
    bytes.extend(settings.as_bytes());
    bytes
}

pub fn container(snapshot_type: i32, payload: &[u8]) -> Vec<u8> {
    container_with(snapshot_type, payload, payload.len() as i32, SETTINGS)
}

/// A small but complete CPU snapshot file.
pub fn example_cpu_file() -> Vec<u8> {
    let tree = NodeSpec::new(0, 1, (1_000, 100)).with_children(vec![
        NodeSpec::new(1, 10, (600, 500))
            .with_children(vec![NodeSpec::new(2, 10, (100, 100))]),
        NodeSpec::new(2, 3, (300, 300)),
    ]);
    let payload = cpu_payload(
        true,
        &METHODS,
        &[
            ThreadSpec::new(1, "main", true, encode_tree(&tree, true, PointerWidth::U24)),
            ThreadSpec::new(
                2,
                "worker-1",
                true,
                encode_tree(&NodeSpec::new(0, 1, (5, 5)), true, PointerWidth::U24),
            ),
        ],
    );
    container(1, &payload)
}
