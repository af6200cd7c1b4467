use std::{env, ops::Range, process::ExitCode};

use memtie::{
    Bridge, BridgeFunction, CONSTANTS, CallTracer, HostValue, MemFdBuffer, NoopTracer, StderrTracer, constants::lookup,
};

const USAGE: &str = "usage: memtie constants [--json]\n       memtie demo [--trace]";

/// Size of both buffers in the demo.
const SIZE: usize = 1 << 16;
/// Where the tie lands in the destination.
const DST_OFFSET: usize = 8192;
/// Where the tie starts in the source.
const SRC_OFFSET: usize = 4096;
const TIE_SIZE: usize = 4096;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let flags: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
    let result = match args.first().map(String::as_str) {
        Some("constants") => print_constants(flags.contains(&"--json")),
        Some("demo") if flags.contains(&"--trace") => {
            let mut bridge = Bridge::new(StderrTracer::new());
            let result = demo(&mut bridge);
            eprintln!("traced {} bridge calls", bridge.tracer().calls());
            result
        }
        Some("demo") => demo(&mut Bridge::<NoopTracer>::untraced()),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_constants(json: bool) -> Result<(), String> {
    if json {
        let out = serde_json::to_string_pretty(CONSTANTS).map_err(|e| e.to_string())?;
        println!("{out}");
    } else {
        for constant in CONSTANTS {
            println!("{:<18} {:#010x}  {}", constant.name, constant.value, constant.group);
        }
    }
    Ok(())
}

/// Ties part of a memfd buffer into an anonymous region and checks that writes are
/// shared in both directions until the tie is undone.
fn demo<Tr: CallTracer>(bridge: &mut Bridge<Tr>) -> Result<(), String> {
    let mut src = MemFdBuffer::open("memtie-demo", SIZE).map_err(|e| e.to_string())?;
    log::info!("opened a {SIZE} byte memfd buffer on fd {:?}", src.fd());

    let prot = lookup("PROT_READ")
        .zip(lookup("PROT_WRITE"))
        .map(|(read, write)| HostValue::from(read | write))
        .ok_or("missing PROT_* constants")?;
    let flags = lookup("MAP_PRIVATE")
        .zip(lookup("MAP_ANONYMOUS"))
        .map(|(private, anonymous)| HostValue::from(private | anonymous))
        .ok_or("missing MAP_* constants")?;
    let size = HostValue::Number(SIZE as f64);

    // SAFETY: no MAP_FIXED, the kernel picks the address
    let address = unsafe {
        bridge.call(
            BridgeFunction::Map,
            &[HostValue::from(0), size.clone(), prot, flags, HostValue::from(-1), HostValue::from(0)],
        )
    }
    .map_err(|e| e.to_string())?;
    // SAFETY: the region was just mapped with SIZE bytes
    let dst_value = unsafe { bridge.call(BridgeFunction::Alias, &[address.clone(), size.clone()]) }
        .map_err(|e| e.to_string())?;
    let dst = dst_value.as_buffer().map_err(|e| e.to_string())?;
    log::info!("mapped a {SIZE} byte destination at {address}");

    // SAFETY: the destination is our own mapping and outlives the tie
    let tie = unsafe { src.tie(dst, DST_OFFSET, Some(TIE_SIZE), SRC_OFFSET) }.map_err(|e| e.to_string())?;
    log::info!(
        "tied {TIE_SIZE} bytes at source offset {SRC_OFFSET} over {:#x}",
        tie.view().address()
    );
    src.close().map_err(|e| e.to_string())?;

    src.fill(0, 100, 42).map_err(|e| e.to_string())?;
    src.fill(SRC_OFFSET + 100, 40, 1).map_err(|e| e.to_string())?;
    {
        // SAFETY: the destination stays mapped and nothing else borrows it here
        let bytes = unsafe { dst.as_mut_slice() };
        bytes[SIZE - 100..].fill(42);
        expect_range("destination", bytes, 0..DST_OFFSET + 100, 0)?;
        expect_range("destination", bytes, DST_OFFSET + 100..DST_OFFSET + 140, 1)?;
        bytes[DST_OFFSET + 140..DST_OFFSET + 180].fill(2);
    }
    let mut shared = vec![0; TIE_SIZE];
    src.read_at(SRC_OFFSET, &mut shared).map_err(|e| e.to_string())?;
    expect_range("source", &shared, 140..180, 2)?;
    expect_range("source", &shared, 180..TIE_SIZE, 0)?;

    log::info!("writes are shared in both directions");

    tie.untie().map_err(|e| e.to_string())?;
    log::info!("untied the destination window");
    {
        // SAFETY: as above
        let bytes = unsafe { dst.as_slice() };
        expect_range("untied destination", bytes, 0..SIZE - 100, 0)?;
        expect_range("untied destination", bytes, SIZE - 100..SIZE, 42)?;
    }
    src.read_at(SRC_OFFSET, &mut shared).map_err(|e| e.to_string())?;
    expect_range("source after untie", &shared, 100..140, 1)?;
    expect_range("source after untie", &shared, 140..180, 2)?;

    // SAFETY: bufferData never dereferences the view
    let data = unsafe { bridge.call(BridgeFunction::BufferData, &[dst_value]) }.map_err(|e| e.to_string())?;
    if data != address {
        return Err(format!("bufferData returned {data}, expected {address}"));
    }
    // SAFETY: no borrows of the region remain
    unsafe { bridge.call(BridgeFunction::Unmap, &[address, size]) }.map_err(|e| e.to_string())?;
    log::info!("unmapped the destination");

    println!("tie demo passed: {TIE_SIZE} bytes shared at destination offset {DST_OFFSET}");
    Ok(())
}

fn expect_range(what: &str, bytes: &[u8], range: Range<usize>, value: u8) -> Result<(), String> {
    match range.clone().find(|&i| bytes[i] != value) {
        Some(i) => Err(format!(
            "{what}: expected {value} in {range:?}, found {} at {i}",
            bytes[i]
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use memtie::{CallEvent, RecordingTracer};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Keeps the info-level messages logged by this binary.
    struct CapturingLogger {
        messages: Mutex<Vec<String>>,
    }

    impl Log for CapturingLogger {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() == Level::Info
        }

        fn log(&self, record: &Record<'_>) {
            if self.enabled(record.metadata())
                && let Ok(mut messages) = self.messages.lock()
            {
                messages.push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CapturingLogger = CapturingLogger {
        messages: Mutex::new(Vec::new()),
    };

    #[test]
    fn demo_logs_each_step() {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Info);

        let mut bridge = Bridge::new(RecordingTracer::new());
        demo(&mut bridge).unwrap();

        let calls: Vec<BridgeFunction> = bridge
            .tracer()
            .events()
            .iter()
            .filter_map(|event| match event {
                CallEvent::Call { function, .. } => Some(*function),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                BridgeFunction::Map,
                BridgeFunction::Alias,
                BridgeFunction::BufferData,
                BridgeFunction::Unmap
            ]
        );

        let messages = LOGGER.messages.lock().unwrap();
        assert_eq!(messages.len(), 6, "{messages:#?}");
        assert!(messages[0].starts_with(&format!("opened a {SIZE} byte memfd buffer")));
        assert!(messages[2].starts_with(&format!("tied {TIE_SIZE} bytes at source offset {SRC_OFFSET}")));
        assert_eq!(messages[5], "unmapped the destination");
    }
}
