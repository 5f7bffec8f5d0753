mod common;

use common::{NodeSpec, ThreadSpec};
use nps::{CallTree, CallTreeNode, Container, CpuSnapshot, Error, NodeId, PointerWidth, TimePair};

fn assert_node(node: &CallTreeNode, spec: &NodeSpec, two_time_stamps: bool) {
    assert_eq!(node.method_id.0, spec.method_id);
    assert_eq!(node.n_calls, spec.n_calls);
    assert_eq!(
        node.time0,
        TimePair {
            time: spec.time0.0,
            self_time: spec.time0.1
        }
    );
    let time1 = two_time_stamps.then_some(TimePair {
        time: spec.time1.0,
        self_time: spec.time1.1,
    });
    assert_eq!(node.time1, time1);
    assert_eq!(node.children.len(), spec.children.len());
}

/// A root with two children, the second of which is stored before the first.
/// Padded with zeros to `len` bytes.
fn explicit_offset_tree(two_time_stamps: bool, width: PointerWidth, len: usize) -> (NodeSpec, Vec<u8>) {
    let first = NodeSpec::new(1, 7, (1 << 32, 3));
    let second = NodeSpec::new(2, u32::MAX, (nps::packed::MAX_U40, 0));
    let root = NodeSpec::new(0, 1, (300, 0)).with_children(vec![first.clone(), second.clone()]);

    let mut bytes = vec![];
    let pointers = common::write_node_header(&mut bytes, &root, two_time_stamps, width);
    bytes.extend([0xEE; 5]); // unreferenced bytes between nodes
    let second_offset = bytes.len();
    common::write_node_header(&mut bytes, &second, two_time_stamps, width);
    let first_offset = bytes.len();
    common::write_node_header(&mut bytes, &first, two_time_stamps, width);
    common::write_pointer(&mut bytes, pointers, first_offset, width);
    common::write_pointer(&mut bytes, pointers + width.bytes(), second_offset, width);

    assert!(bytes.len() <= len);
    bytes.resize(len, 0);
    (root, bytes)
}

#[test]
fn round_trip_all_layouts() {
    for two_time_stamps in [false, true] {
        for (width, len) in [(PointerWidth::U24, 100), (PointerWidth::U32, 0x100_0000)] {
            assert_eq!(PointerWidth::for_tree_len(len), width);

            let (root, tree) = explicit_offset_tree(two_time_stamps, width, len);
            let payload = common::cpu_payload(
                two_time_stamps,
                &common::METHODS,
                &[ThreadSpec::new(1, "main", two_time_stamps, tree)],
            );
            let cpu = CpuSnapshot::decode(&payload).unwrap();

            assert_eq!(cpu.version, 1);
            assert_eq!(cpu.begin_time, 1_700_000_000_000);
            assert_eq!(cpu.time_taken, 1_700_000_060_000);
            assert_eq!(cpu.collecting_two_time_stamps, two_time_stamps);
            assert_eq!(cpu.methods.len(), 3);

            let thread = &cpu.threads[0];
            assert_eq!(thread.thread_id, 1);
            assert_eq!(thread.thread_name, "main");
            common::assert_summary(thread);

            let tree = &thread.call_tree;
            assert_eq!(tree.len(), 3);
            assert_node(tree.root().unwrap(), &root, two_time_stamps);
            let children: Vec<_> = tree.children(NodeId::ROOT).collect();
            assert_eq!(children.len(), 2);
            // Pointer order wins over storage order:
            assert_node(children[0].1, &root.children[0], two_time_stamps);
            assert_node(children[1].1, &root.children[1], two_time_stamps);
            assert_eq!(children[0].1.time0.time, 1 << 32);
        }
    }
}

#[test]
fn round_trip_through_container() {
    let (root, tree) = explicit_offset_tree(true, PointerWidth::U32, 0x100_0000);
    let payload = common::cpu_payload(
        true,
        &common::METHODS,
        &[ThreadSpec::new(9, "big", true, tree)],
    );
    let container = Container::decode(&common::container(1, &payload)).unwrap();
    let cpu = container.cpu().unwrap();
    assert_eq!(cpu.threads[0].call_tree.len(), 3);
    assert_node(cpu.threads[0].call_tree.root().unwrap(), &root, true);
}

#[test]
fn pointer_width_boundary() {
    let two_leaves = NodeSpec::new(0, 1, (10, 0)).with_children(vec![
        NodeSpec::new(1, 1, (6, 6)),
        NodeSpec::new(2, 1, (4, 4)),
    ]);
    let decode = |width: PointerWidth, len: usize| {
        let mut tree = common::encode_tree(&two_leaves, false, width);
        tree.resize(len, 0);
        let payload = common::cpu_payload(false, &common::METHODS, &[ThreadSpec::new(1, "t", false, tree)]);
        CpuSnapshot::decode(&payload)
    };

    let at_limit = decode(PointerWidth::U24, 0xFF_FFFF).unwrap();
    assert_eq!(at_limit.threads[0].call_tree.len(), 3);

    let past_limit = decode(PointerWidth::U32, 0x100_0000).unwrap();
    assert_eq!(past_limit.threads[0].call_tree, at_limit.threads[0].call_tree);

    // 4 byte pointers in a buffer small enough for 3 byte pointers are misread:
    // the first pointer, 0x0000001A, is read as 0x000000 and points back at the root.
    assert!(matches!(
        decode(PointerWidth::U32, 0xFF_FFFF),
        Err(Error::OffsetCycle { offset: 0 })
    ));
}

#[test]
fn snapshot_flag_decides_tree_layout() {
    let tree = common::encode_tree(
        &NodeSpec::new(0, 1, (10, 2)).with_children(vec![NodeSpec::new(1, 2, (8, 8))]),
        true,
        PointerWidth::U24,
    );
    // The thread claims a single time stamp, the snapshot two:
    let payload = common::cpu_payload(true, &common::METHODS, &[ThreadSpec::new(3, "odd", false, tree)]);
    let cpu = CpuSnapshot::decode(&payload).unwrap();
    let thread = &cpu.threads[0];
    assert!(!thread.collecting_two_time_stamps);
    assert_eq!(thread.call_tree.len(), 2);
    assert_eq!(
        thread.call_tree.root().unwrap().time1,
        Some(TimePair {
            time: 5,
            self_time: 1
        })
    );
}

#[test]
fn resolves_methods() {
    let container = Container::decode(&common::example_cpu_file()).unwrap();
    let cpu = container.cpu().unwrap();
    let main = cpu.thread_by_name("main").unwrap();

    let names: Vec<(usize, String)> = main
        .call_tree
        .walk()
        .map(|(depth, _, node)| (depth, cpu.resolve(node).unwrap().full_name()))
        .collect();
    assert_eq!(
        names,
        vec![
            (0, "java.lang.Thread.run".to_owned()),
            (1, "com.example.Worker.process".to_owned()),
            (2, "com.example.Worker.flush".to_owned()),
            (1, "com.example.Worker.flush".to_owned()),
        ]
    );
    assert_eq!(main.call_tree.depth(), 3);
    assert!(cpu.thread_by_name("nobody").is_none());
}

#[test]
fn tree_length_beyond_payload() {
    let tree = vec![0; 100];
    let mut payload = common::cpu_payload(false, &[], &[ThreadSpec::new(1, "main", false, tree)]);
    // Cut into the call tree bytes (the thread summary that follows is 77 bytes):
    payload.truncate(payload.len() - 150);
    assert!(matches!(
        CpuSnapshot::decode(&payload),
        Err(Error::OutOfBounds { len: 100, .. })
    ));
}

#[test]
fn empty_call_tree() {
    let payload = common::cpu_payload(false, &[], &[ThreadSpec::new(1, "idle", false, vec![])]);
    assert!(matches!(
        CpuSnapshot::decode(&payload),
        Err(Error::OutOfBounds {
            offset: 0,
            available: 0,
            ..
        })
    ));
}

#[test]
fn deep_tree_does_not_overflow_the_stack() {
    const DEPTH: usize = 100_000;
    let width = PointerWidth::U24;
    let node_len = 16 + 2 + width.bytes();

    let mut bytes = Vec::with_capacity(DEPTH * node_len);
    for i in 0..DEPTH {
        let time = (DEPTH - i) as u64;
        let mut link = NodeSpec::new((i % 3) as u16, 1, (time, 1));
        if i + 1 < DEPTH {
            link = link.with_children(vec![NodeSpec::new(0, 0, (0, 0))]);
        }
        let pointers = common::write_node_header(&mut bytes, &link, false, width);
        if i + 1 < DEPTH {
            common::write_pointer(&mut bytes, pointers, (i + 1) * node_len, width);
        }
    }

    let tree = CallTree::decode(&bytes, false, width).unwrap();
    assert_eq!(tree.len(), DEPTH);
    assert_eq!(tree.depth(), DEPTH);
    let (depth, id, node) = tree.walk().last().unwrap();
    assert_eq!(depth, DEPTH - 1);
    assert_eq!(id.index(), DEPTH - 1);
    assert_eq!(node.time0.time, 1);
}
