use calltrace::config::Config;
use calltrace::domain::StackFrame;
use calltrace::emitter::{TraceEmitter, TraceSink};
use calltrace_common::parse_trace_line;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const CALLS_PER_THREAD: usize = 250;

#[test]
fn test_concurrent_emissions_never_interleave() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("calls.log");
    let config = Config::new(["com.acme"]).with_output_path(path.clone());
    let emitter = Arc::new(TraceEmitter::from_config(&config, TraceSink::open(&config)));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let emitter = Arc::clone(&emitter);
            thread::spawn(move || {
                let class = format!("com/acme/Worker{t}");
                let stack = vec![StackFrame::new(class.as_str(), "step"), StackFrame::new("com/acme/Main", "main")];
                for _ in 0..CALLS_PER_THREAD {
                    emitter.log_method_called(&class, "step", &stack);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Emitter thread panicked");
    }
    emitter.close();

    let contents = fs::read_to_string(&path).expect("Failed to read trace file");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), THREADS * CALLS_PER_THREAD);

    let mut classes = HashSet::new();
    for line in lines {
        let parsed = parse_trace_line(line).unwrap_or_else(|| panic!("Malformed line: {line}"));
        assert_eq!(parsed.method_name, "step");
        assert_eq!(parsed.caller, Some(("com.acme.Main", "main")));
        assert!(parsed.class_name.starts_with("com.acme.Worker"));
        classes.insert(parsed.class_name.to_string());
    }
    assert_eq!(classes.len(), THREADS);
}

#[test]
fn test_widget_run_from_non_target_caller() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("calls.log");
    let config = Config::new(["com/acme"]).with_output_path(path.clone());
    let emitter = TraceEmitter::from_config(&config, TraceSink::open(&config));

    let stack = vec![
        StackFrame::new("calltrace/Tracer", "logMethodCalled"),
        StackFrame::new("com/acme/Widget", "run"),
        StackFrame::new("org/example/Launcher", "main"),
    ];
    emitter.log_method_called("com/acme/Widget", "run", &stack);
    emitter.close();

    let contents = fs::read_to_string(&path).expect("Failed to read trace file");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(" METHOD CALLED --> Class: \"com.acme.Widget\", Method: \"run\""));
    assert_eq!(parse_trace_line(lines[0]).unwrap().caller, None);
}

#[test]
fn test_output_file_is_truncated_at_start() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("calls.log");
    fs::write(&path, "line from a previous run\n").expect("Failed to seed trace file");

    let config = Config::new(["com.acme"]).with_output_path(path.clone());
    let emitter = TraceEmitter::from_config(&config, TraceSink::open(&config));
    emitter.log_method_called("com/acme/Widget", "run", &Vec::<StackFrame>::new());
    emitter.close();

    let contents = fs::read_to_string(&path).expect("Failed to read trace file");
    assert_eq!(contents.lines().count(), 1);
    assert!(!contents.contains("previous run"));
}
