extern crate clap;
use crossbeam_channel::{bounded, select, unbounded};
use ctrlc; // exit using cntrl-c
use env_logger;
use log::{debug, error, info};

use std::io::Write;
use std::sync::Arc;

// Internal project modules
use ruart_bridge::{FlushReason, IrqCallback, TxCallback, UartBridge, MAX_LINES};
use ruart_core::constants::{fcr, ier, lcr, lsr, offsets, FIFO_DEPTH};

/// Configures command-line interface using clap
fn get_cli_config<'a>() -> clap::ArgMatches<'a> {
    let description = "Emulated 16550A UART with a virtual interrupt line";
    clap::App::new("Rust UART Emulator (RUART)")
        .version("0.1")
        .about(description)
        .arg(
            clap::Arg::with_name("line")
                .short("l")
                .long("line")
                .takes_value(true)
                .default_value("0")
                .help("Channel index in the fixed line table (0-3)"),
        )
        .arg(
            clap::Arg::with_name("threshold")
                .short("t")
                .long("threshold")
                .takes_value(true)
                .default_value("16")
                .help("Transmit flush threshold in bytes (1-16)"),
        )
        .get_matches()
}

/// Interactive echo console: stdin bytes are injected into the
/// emulated receive FIFO, a fake host-driver ISR echoes them back
/// through the transmit holding register, and flushed transmit bytes
/// land on stdout.
fn main() {
    env_logger::init();

    // Set up Ctrl-C handler with channel communication
    let (signal_sender, signal_receiver) = bounded(1);
    let handler_result = ctrlc::set_handler(move || {
        if signal_sender.is_full() {
            std::process::exit(-1); // Emergency exit if channel blocked
        }
        let _send_result = signal_sender.send(());
    });
    if let Err(e) = handler_result {
        error!("Signal handler failed: {:?}", e);
        return;
    }

    // Parse command-line arguments
    let cli_matches = get_cli_config();
    let line: usize = match cli_matches.value_of("line").unwrap_or("0").parse() {
        Ok(index) if index < MAX_LINES => index,
        _ => {
            error!("Invalid line index (expected 0-{})", MAX_LINES - 1);
            return;
        }
    };
    let threshold: usize = match cli_matches.value_of("threshold").unwrap_or("16").parse() {
        Ok(mark) if (1..=FIFO_DEPTH).contains(&mark) => mark,
        _ => {
            error!("Invalid threshold (expected 1-{})", FIFO_DEPTH);
            return;
        }
    };

    // Bring the emulated channel up
    let bridge = Arc::new(UartBridge::new());
    if let Err(e) = bridge.add_device(line) {
        error!("add_device failed: {}", e);
        return;
    }
    match bridge.line_info(line) {
        Ok(info) => info!(
            "line {} live at base {:#06x}, irq {}",
            line, info.base_addr, info.irq
        ),
        Err(e) => {
            error!("line_info failed: {}", e);
            return;
        }
    }

    // Flushed transmit bytes go straight to stdout, like a console sink
    let flush_sink: TxCallback = Arc::new(move |bytes: &[u8], reason: FlushReason| {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
        debug!("flushed {} bytes ({:?})", bytes.len(), reason);
    });
    if let Err(e) = bridge.set_tx_callback(line, Some(flush_sink), threshold) {
        error!("set_tx_callback failed: {}", e);
        return;
    }

    // A stand-in for the host driver's interrupt service routine:
    // drain the receive FIFO and echo it through the transmitter
    let isr_bridge = Arc::clone(&bridge);
    let isr: IrqCallback = Arc::new(move |iir_value| {
        debug!("virtual interrupt, iir {:#04x}", iir_value);
        while isr_bridge.read(line, offsets::LSR) & lsr::DATA_READY != 0 {
            let byte = isr_bridge.read(line, offsets::RBR);
            isr_bridge.write(line, offsets::THR, byte);
        }
    });
    if let Err(e) = bridge.set_irq_callback(line, Some(isr)) {
        error!("set_irq_callback failed: {}", e);
        return;
    }

    // Program the chip the way a host driver would: divisor for the
    // full baud base, 8N1 framing, FIFOs on, RX interrupts enabled
    bridge.write(line, offsets::LCR, lcr::DLAB);
    bridge.write(line, offsets::DLL, 0x01);
    bridge.write(line, offsets::DLM, 0x00);
    bridge.write(line, offsets::LCR, 0x03);
    bridge.write(line, offsets::FCR, fcr::ENABLE | fcr::CLEAR_RX | fcr::CLEAR_TX);
    bridge.write(line, offsets::IER, ier::RDA | ier::RLS);

    // Feed stdin lines from a side thread so shutdown stays responsive
    let (line_sender, line_receiver) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut buffer = String::new();
        loop {
            buffer.clear();
            match stdin.read_line(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if line_sender.send(buffer.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    info!("echo console on line {}; Ctrl-C to exit", line);
    loop {
        select! {
            recv(signal_receiver) -> _ => break,
            recv(line_receiver) -> message => {
                let text = match message {
                    Ok(text) => text,
                    Err(_) => break, // stdin closed
                };
                for chunk in text.as_bytes().chunks(FIFO_DEPTH) {
                    let mut offset = 0;
                    while offset < chunk.len() {
                        match bridge.inject_rx(line, &chunk[offset..]) {
                            // FIFO full: wait for the ISR to drain it
                            Ok(0) => std::thread::sleep(std::time::Duration::from_millis(1)),
                            Ok(accepted) => offset += accepted,
                            Err(e) => {
                                error!("inject_rx failed: {}", e);
                                break;
                            }
                        }
                    }
                }
                // Give the interrupt worker a beat to echo, then nudge
                // an idle flush so short lines are not held back
                std::thread::sleep(std::time::Duration::from_millis(5));
                bridge.write(line, offsets::IER, ier::RDA | ier::RLS | ier::THRE);
                bridge.write(line, offsets::IER, ier::RDA | ier::RLS);
            }
        }
    }

    if let Err(e) = bridge.remove_device(line) {
        error!("remove_device failed: {}", e);
    }
}
