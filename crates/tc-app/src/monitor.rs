use std::fmt::Write as _;
use std::net::UdpSocket;
use std::time::Duration;

use anyhow::{Context, Result};
use tc_osc::message::{OscArg, OscMessage, decode_packet};

/// Vectors longer than this are shown truncated.
const PREVIEW: usize = 6;

/// One readable line per message.
#[must_use]
pub fn format_message(message: &OscMessage) -> String {
    let mut line = message.address.clone();
    match message.args.as_slice() {
        [] => {}
        [arg] => {
            let _ = write!(line, " {}", format_arg(arg));
        }
        args => {
            let _ = write!(line, " [{}]", args.len());
            for arg in args.iter().take(PREVIEW) {
                let _ = write!(line, " {}", format_arg(arg));
            }
            if args.len() > PREVIEW {
                line.push_str(" …");
            }
        }
    }
    line
}

fn format_arg(arg: &OscArg) -> String {
    match arg {
        OscArg::Float(v) => format!("{v:.3}"),
        OscArg::Int(v) => v.to_string(),
        OscArg::Bool(b) => b.to_string(),
        OscArg::Str(s) => format!("{s:?}"),
    }
}

/// Listen on `bind:port` and print every decoded message.
///
/// Stops after `count` datagrams, or when `shutdown` fires.
///
/// # Errors
/// Returns an error if the socket cannot be bound.
pub fn run(bind: &str, port: u16, count: Option<usize>, shutdown: &flume::Receiver<()>) -> Result<()> {
    let socket = UdpSocket::bind((bind, port)).with_context(|| format!("Impossible d'écouter {bind}:{port}"))?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    log::info!("Écoute OSC sur {}", socket.local_addr()?);

    let mut buf = vec![0u8; 65_536];
    let mut received = 0usize;
    while count.is_none_or(|n| received < n) {
        if shutdown.try_recv().is_ok() {
            break;
        }
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                log::warn!("Réception UDP : {e}");
                continue;
            }
        };
        received += 1;
        match decode_packet(&buf[..n]) {
            Ok(messages) => {
                println!("── {from} : {n} octets, {} messages", messages.len());
                for message in &messages {
                    println!("  {}", format_message(message));
                }
            }
            Err(e) => log::warn!("Paquet de {from} ignoré : {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tc_core::feature::FeatureValue;
    use tc_osc::message::encode_message;

    use super::*;

    fn decoded(address: &str, value: &FeatureValue) -> OscMessage {
        decode_packet(&encode_message(address, value)).unwrap().remove(0)
    }

    #[test]
    fn scalar_and_flag_lines() {
        assert_eq!(
            format_message(&decoded("/aubio/bpm", &FeatureValue::Scalar(120.0))),
            "/aubio/bpm 120.000"
        );
        assert_eq!(
            format_message(&decoded("/essentia/isOnset", &FeatureValue::Flag(false))),
            "/essentia/isOnset false"
        );
    }

    #[test]
    fn long_vector_is_truncated() {
        let line = format_message(&decoded("/essentia/mfcc", &FeatureValue::Vector(vec![1.0; 13])));
        assert!(line.starts_with("/essentia/mfcc [13] 1.000"));
        assert!(line.ends_with('…'));
    }

    #[test]
    fn stops_after_count() {
        let spare = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        let (_tx, shutdown) = flume::bounded(1);
        let listener = std::thread::spawn(move || run("127.0.0.1", port, Some(1), &shutdown));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let bytes = encode_message("/aubio/bpm", &FeatureValue::Scalar(90.0));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !listener.is_finished() && std::time::Instant::now() < deadline {
            sender.send_to(&bytes, ("127.0.0.1", port)).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        listener.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let (tx, shutdown) = flume::bounded(1);
        tx.send(()).unwrap();
        run("127.0.0.1", 0, None, &shutdown).unwrap();
    }
}
