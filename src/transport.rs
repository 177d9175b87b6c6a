//! The serial transactor (§4.E): owns the exclusive serial handle and
//! provides request/response transactions with timeouts, enforcing at most
//! one in-flight command.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;

use crate::error::TransactError;
use crate::wire::crc::crc8;
use crate::wire::frame::{parse_response, FrameError, ResponseFrame};
use crate::wire::slip;

/// Read timeout applied to each inbound read within a transaction (§4.E).
const READ_TIMEOUT: Duration = Duration::from_millis(1000);
/// Upper bound on how many bytes we'll read while hunting for one frame;
/// matches the 256-byte frame ceiling with headroom for stray noise bytes.
const READ_CHUNK: usize = 512;

/// Anything the transactor can read from and write to: a real serial port
/// in production, an in-memory duplex pipe in tests.
pub trait Wire: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Wire for T {}

/// Opens the real serial port named by `path` at `baud` (§4.E configuration:
/// 115 200 baud, 8N1, no flow control).
pub fn open_serial(path: &std::path::Path, baud: u32) -> std::io::Result<Box<dyn Wire>> {
    let port = tokio_serial::new(path.to_string_lossy(), baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open_native_async()?;
    Ok(Box::new(port))
}

/// Serializes access to one serial handle and implements the
/// command/response transaction protocol (§4.E).
pub struct Transactor {
    io: Mutex<Box<dyn Wire>>,
}

impl Transactor {
    pub fn new(io: Box<dyn Wire>) -> Self {
        Self { io: Mutex::new(io) }
    }

    /// Sends `command_payload` (tag + encoded args) as a framed command and
    /// waits for exactly one framed response, bounded by `deadline`.
    ///
    /// Returns the response payload with its trailing CRC already stripped.
    /// A device-reported error (`0xFF` marker) surfaces as
    /// [`TransactError::DeviceError`] rather than a payload.
    pub async fn transact(
        &self,
        command_payload: &[u8],
        deadline: Duration,
    ) -> Result<Vec<u8>, TransactError> {
        let mut guard = self.io.lock().await;
        let io = &mut *guard;

        tokio::time::timeout(deadline, Self::run_transaction(io, command_payload))
            .await
            .unwrap_or(Err(TransactError::Timeout))
    }

    async fn run_transaction(
        io: &mut Box<dyn Wire>,
        command_payload: &[u8],
    ) -> Result<Vec<u8>, TransactError> {
        let mut raw_frame = command_payload.to_vec();
        raw_frame.push(crc8(command_payload));
        let encoded = slip::encode_to_vec(&raw_frame);

        io.write_all(&encoded).await?;
        io.flush().await?;

        let mut decoder = slip::Decoder::new();
        let mut emitted: Option<Vec<u8>> = None;
        let mut chunk = [0u8; READ_CHUNK];

        while emitted.is_none() {
            let n = io.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransactError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "serial port closed mid-transaction",
                )));
            }
            decoder.feed(&chunk[..n], |frame| {
                if emitted.is_none() {
                    emitted = Some(frame.to_vec());
                }
            });
        }

        let raw = emitted.expect("loop only exits once a frame is emitted");
        match parse_response(&raw) {
            Ok(ResponseFrame::Payload(payload)) => Ok(payload),
            Ok(ResponseFrame::DeviceError(code)) => Err(TransactError::DeviceError(code)),
            Err(FrameError::Truncated) => Err(TransactError::TruncatedResponse),
            Err(FrameError::CrcMismatch) => Err(TransactError::CrcMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wraps an in-memory duplex half and replies to every request it sees
    /// with a pre-scripted response frame, simulating the device side.
    async fn spawn_echo_device(
        mut device_end: tokio::io::DuplexStream,
        responses: Vec<Vec<u8>>,
    ) {
        tokio::spawn(async move {
            let mut decoder = slip::Decoder::new();
            let mut chunk = [0u8; READ_CHUNK];
            for response in responses {
                loop {
                    let n = match device_end.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let mut got_frame = false;
                    decoder.feed(&chunk[..n], |_frame| got_frame = true);
                    if got_frame {
                        break;
                    }
                }
                let encoded = slip::encode_to_vec(&response);
                if device_end.write_all(&encoded).await.is_err() {
                    return;
                }
            }
        });
    }

    fn canned_response(payload: &[u8]) -> Vec<u8> {
        let mut raw = payload.to_vec();
        raw.push(crc8(payload));
        raw
    }

    #[tokio::test]
    async fn successful_transaction_returns_payload() {
        let (host, device) = tokio::io::duplex(4096);
        spawn_echo_device(device, vec![canned_response(&[0x00, 0x00])]).await;
        let transactor = Transactor::new(Box::new(host));

        let result = transactor
            .transact(&[0x02], Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(result, vec![0x00, 0x00]);
    }

    #[tokio::test]
    async fn void_return_yields_empty_payload_not_truncated() {
        let (host, device) = tokio::io::duplex(4096);
        spawn_echo_device(device, vec![canned_response(&[])]).await;
        let transactor = Transactor::new(Box::new(host));

        let result = transactor
            .transact(&[0x01, 0x05, 0x00], Duration::from_millis(500))
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn device_error_surfaces_as_device_error() {
        let (host, device) = tokio::io::duplex(4096);
        spawn_echo_device(device, vec![canned_response(&[0xFF, 0x02])]).await;
        let transactor = Transactor::new(Box::new(host));

        let result = transactor.transact(&[0x05], Duration::from_millis(500)).await;
        assert!(matches!(result, Err(TransactError::DeviceError(0x02))));
    }

    #[tokio::test]
    async fn corrupted_crc_is_reported_and_connection_stays_usable() {
        let (host, device) = tokio::io::duplex(4096);
        let mut bad = canned_response(&[0x00, 0x00]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        spawn_echo_device(device, vec![bad, canned_response(&[0x01, 0x00])]).await;
        let transactor = Transactor::new(Box::new(host));

        let first = transactor.transact(&[0x02], Duration::from_millis(500)).await;
        assert!(matches!(first, Err(TransactError::CrcMismatch)));

        let second = transactor.transact(&[0x02], Duration::from_millis(500)).await;
        assert_eq!(second.unwrap(), vec![0x01, 0x00]);
    }

    #[tokio::test]
    async fn no_response_times_out() {
        let (host, _device) = tokio::io::duplex(4096);
        let transactor = Transactor::new(Box::new(host));
        let result = transactor.transact(&[0x02], Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TransactError::Timeout)));
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_interleave_frames() {
        let (host, device) = tokio::io::duplex(8192);
        spawn_echo_device(
            device,
            vec![canned_response(&[0x00, 0x00]), canned_response(&[0x00, 0x01])],
        )
        .await;
        let transactor = std::sync::Arc::new(Transactor::new(Box::new(host)));

        let t1 = transactor.clone();
        let t2 = transactor.clone();
        let (a, b) = tokio::join!(
            t1.transact(&[0x02], Duration::from_secs(2)),
            t2.transact(&[0x02], Duration::from_secs(2))
        );
        let mut results = vec![a.unwrap(), b.unwrap()];
        results.sort();
        assert_eq!(results, vec![vec![0x00, 0x00], vec![0x00, 0x01]]);
    }
}
