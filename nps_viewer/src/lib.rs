//! Text rendering of decoded NetBeans profiler snapshots, used by the `nps_viewer` binary.

use nps::{Container, CpuSnapshot, Snapshot, Thread};
use std::fmt::Write;

/// What to include when rendering.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Only render call tree nodes up to this depth (the root is at depth 0).
    pub max_depth: Option<usize>,

    /// Only render threads with this name.
    pub thread: Option<String>,
}

/// Writes a human readable description of `container` to `out`.
///
/// # Errors
/// Only if writing to `out` fails.
pub fn render(out: &mut impl Write, container: &Container, options: &RenderOptions) -> std::fmt::Result {
    writeln!(
        out,
        "NetBeans profiler snapshot v{}.{}, type {}",
        container.version[0], container.version[1], container.snapshot_type
    )?;
    writeln!(
        out,
        "Payload: {} bytes compressed, {} bytes uncompressed",
        container.compressed_len, container.uncompressed_len
    )?;

    match &container.snapshot {
        Snapshot::Cpu(cpu) => render_cpu(out, cpu, options),
        Snapshot::Unparsed(payload) => writeln!(out, "Payload not decoded ({} bytes)", payload.len()),
        _ => writeln!(out, "Unknown payload"),
    }
}

fn render_cpu(out: &mut impl Write, cpu: &CpuSnapshot, options: &RenderOptions) -> std::fmt::Result {
    writeln!(
        out,
        "CPU snapshot v{}: {} methods, {} threads, {}",
        cpu.version,
        cpu.methods.len(),
        cpu.threads.len(),
        if cpu.collecting_two_time_stamps {
            "wall clock and thread CPU times"
        } else {
            "wall clock times"
        }
    )?;

    let threads = cpu.threads.iter().filter(|thread| {
        options
            .thread
            .as_ref()
            .is_none_or(|name| &thread.thread_name == name)
    });
    for thread in threads {
        writeln!(out)?;
        render_thread(out, cpu, thread, options)?;
    }
    Ok(())
}

fn render_thread(
    out: &mut impl Write,
    cpu: &CpuSnapshot,
    thread: &Thread,
    options: &RenderOptions,
) -> std::fmt::Result {
    writeln!(
        out,
        "Thread {} {:?}: {} nodes, depth {}, {} invocations",
        thread.thread_id,
        thread.thread_name,
        thread.call_tree.len(),
        thread.call_tree.depth(),
        thread.total_inv_no
    )?;

    for (depth, _, node) in thread.call_tree.walk() {
        if options.max_depth.is_some_and(|max_depth| depth > max_depth) {
            continue;
        }
        let name = cpu
            .resolve(node)
            .map_or_else(|| format!("<unknown method {}>", node.method_id.0), |m| m.full_name());
        write!(
            out,
            "{:indent$}{name}  calls: {}  time: {}  self: {}",
            "",
            node.n_calls,
            node.time0.time,
            node.time0.self_time,
            indent = 2 * (depth + 1)
        )?;
        if let Some(time1) = node.time1 {
            write!(out, "  cpu: {}  cpu self: {}", time1.time, time1.self_time)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
fn example_container() -> Container {
    let mut payload = vec![];
    payload.extend(1_i32.to_be_bytes());
    payload.extend([0; 16]);
    payload.push(0);
    payload.extend(1_i32.to_be_bytes());
    for text in ["Main", "main", "([Ljava/lang/String;)V"] {
        payload.extend((text.len() as u16).to_be_bytes());
        payload.extend(text.as_bytes());
    }
    payload.extend(1_i32.to_be_bytes());
    payload.extend(5_i32.to_be_bytes());
    payload.extend(4_u16.to_be_bytes());
    payload.extend(b"main");
    payload.push(0);
    // A root (method 0) with an unknown child (method 9):
    let tree: Vec<u8> = [
        &[0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 100, 0, 0, 0, 0, 40, 0, 1, 0, 0, 21][..],
        &[0, 9, 0, 0, 0, 2, 0, 0, 0, 0, 60, 0, 0, 0, 0, 60, 0, 0][..],
    ]
    .concat();
    payload.extend((tree.len() as i32).to_be_bytes());
    payload.extend(&tree);
    payload.extend([0; 77]);

    nps::Container {
        version: [1, 2],
        snapshot_type: nps::SnapshotType::CPU,
        compressed_len: 0,
        uncompressed_len: payload.len(),
        settings: String::new(),
        snapshot: Snapshot::Cpu(CpuSnapshot::decode(&payload).unwrap()),
    }
}

#[test]
fn renders_call_tree() {
    let mut text = String::new();
    render(&mut text, &example_container(), &RenderOptions::default()).unwrap();
    assert!(text.starts_with("NetBeans profiler snapshot v1.2, type 1 (CPU)\n"));
    assert!(text.contains("Thread 5 \"main\": 2 nodes, depth 2, 0 invocations\n"));
    assert!(text.contains("\n  Main.main  calls: 1  time: 100  self: 40\n"));
    assert!(text.contains("\n    <unknown method 9>  calls: 2  time: 60  self: 60\n"));
}

#[test]
fn max_depth_and_thread_filter() {
    let container = example_container();

    let mut text = String::new();
    let options = RenderOptions {
        max_depth: Some(0),
        thread: None,
    };
    render(&mut text, &container, &options).unwrap();
    assert!(text.contains("Main.main"));
    assert!(!text.contains("unknown method"));

    let mut text = String::new();
    let options = RenderOptions {
        max_depth: None,
        thread: Some("worker".to_owned()),
    };
    render(&mut text, &container, &options).unwrap();
    assert!(!text.contains("Thread 5"));
}
