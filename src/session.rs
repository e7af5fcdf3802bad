//! NFLOG session: startup handshake, receive loop, and delivery channels.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tracing::{debug, trace};

use super::codec::{ConfigCmd, CopyMode, encode_config_cmd, encode_config_mode};
use super::config::Config;
use super::error::{Error, Result};
use super::message::{MessageIter, NLMSG_ERROR};
use super::packet::Packet;
use super::socket::NetlinkSocket;

/// An NFLOG session.
///
/// Construction validates the configuration, opens a NETLINK_NETFILTER
/// socket, runs the configuration handshake synchronously, then hands the
/// socket to a background receive loop. Decoded records are consumed via
/// [`recv`](Self::recv) or the [`Stream`] impl.
///
/// Record delivery is a capacity-one hand-off: a slow consumer blocks the
/// receive loop, which in turn throttles kernel-side draining instead of
/// buffering without bound. The record channel closing is the terminal
/// signal that the loop has stopped.
///
/// # Example
///
/// ```ignore
/// use nflog::{Config, Nflog};
///
/// let mut session = Nflog::new(Config::new().group(32)).await?;
/// while let Some(packet) = session.recv().await {
///     println!("group {}: {:?}", packet.group, packet.prefix);
/// }
/// ```
pub struct Nflog {
    records: mpsc::Receiver<Packet>,
    errors: Option<mpsc::Receiver<Error>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Nflog {
    /// Open a session with the given configuration.
    ///
    /// Fails with [`Error::Config`] before any socket is opened if the
    /// configuration is invalid; a transport or kernel failure during the
    /// handshake closes the socket and fails construction.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let socket = NetlinkSocket::new()?;
        // A handshake error drops the socket here, closing it before the
        // caller sees the error.
        handshake(&socket, &config).await?;

        let (record_tx, record_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = if config.report_errors {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(receive_loop(socket, record_tx, error_tx, shutdown_rx));

        Ok(Self {
            records: record_rx,
            errors: error_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Receive the next decoded record.
    ///
    /// Returns `None` once the receive loop has stopped (fatal transport
    /// error or shutdown).
    pub async fn recv(&mut self) -> Option<Packet> {
        self.records.recv().await
    }

    /// Take the error channel, present when
    /// [`report_errors`](Config::report_errors) was enabled.
    ///
    /// The channel must be drained; the receive loop blocks on it when
    /// reporting an error.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.errors.take()
    }

    /// Stop the receive loop and close the socket, waiting for the loop
    /// to finish.
    ///
    /// Dropping the session has the same effect without the wait.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Stream for Nflog {
    type Item = Packet;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_recv(cx)
    }
}

/// Build the ordered configuration datagrams for a session: family
/// unbind, family bind, then bind + set-mode per group in caller order.
/// Sequence numbers start at zero and increase by one per datagram.
fn handshake_frames(config: &Config) -> Vec<Vec<u8>> {
    let family = libc::AF_INET as u8;
    let mut frames = Vec::with_capacity(2 + 2 * config.groups.len());

    // Clear any stale family-level registration before binding.
    frames.push(encode_config_cmd(ConfigCmd::PfUnbind, family, 0, 0));
    frames.push(encode_config_cmd(ConfigCmd::PfBind, family, 0, 1));

    let mut seq = 2;
    for &group in &config.groups {
        frames.push(encode_config_cmd(ConfigCmd::Bind, family, group, seq));
        frames.push(encode_config_mode(
            group,
            CopyMode::Packet,
            config.copy_range,
            seq + 1,
        ));
        seq += 2;
    }

    frames
}

/// Run the startup exchange: each datagram is sent and its reply awaited
/// and validated before the next one goes out.
async fn handshake(socket: &NetlinkSocket, config: &Config) -> Result<()> {
    for (seq, frame) in handshake_frames(config).into_iter().enumerate() {
        socket.send(&frame).await?;
        let reply = socket.recv_msg().await?;
        check_ack(&reply, seq as u32)?;
    }
    debug!(groups = ?config.groups, copy_range = config.copy_range, "nflog handshake complete");
    Ok(())
}

/// Validate a handshake reply: it must carry the request's sequence
/// number, and an NLMSG_ERROR body with a non-zero errno fails the step
/// with the kernel's error.
fn check_ack(reply: &[u8], expected_seq: u32) -> Result<()> {
    let (header, payload) = MessageIter::new(reply)
        .next()
        .ok_or_else(|| Error::InvalidMessage("empty handshake reply".into()))??;

    let actual = header.seq();
    if actual != expected_seq {
        return Err(Error::SequenceMismatch {
            expected: expected_seq,
            actual,
        });
    }

    if header.msg_type() == NLMSG_ERROR {
        if payload.len() < 4 {
            return Err(Error::InvalidMessage("truncated NLMSG_ERROR body".into()));
        }
        let errno = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if errno != 0 {
            return Err(Error::from_errno(errno));
        }
    }

    Ok(())
}

/// Source of raw datagrams for the receive loop. The loop only ever
/// reads; keeping the read seam narrow lets its error handling run
/// against scripted input.
trait DatagramSource {
    async fn recv_msg(&self) -> Result<Vec<u8>>;
}

impl DatagramSource for NetlinkSocket {
    async fn recv_msg(&self) -> Result<Vec<u8>> {
        NetlinkSocket::recv_msg(self).await
    }
}

/// Background task: drain the socket and feed the delivery channels until
/// a fatal transport error or shutdown. Owns the socket; dropping it on
/// exit closes the transport exactly once.
async fn receive_loop<S: DatagramSource>(
    socket: S,
    records: mpsc::Sender<Packet>,
    errors: Option<mpsc::Sender<Error>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    debug!("nflog receive loop running");

    loop {
        // The shutdown arm also fires when the session handle is dropped.
        let data = tokio::select! {
            _ = &mut shutdown => break,
            result = socket.recv_msg() => match result {
                Ok(data) => data,
                Err(e) => {
                    let overrun = e.is_overrun();
                    report(&errors, e).await;
                    if overrun {
                        // Kernel dropped messages before we could read
                        // them; the socket itself is still healthy.
                        continue;
                    }
                    break;
                }
            },
        };

        if dispatch(&data, &records, &errors).await.is_err() {
            break;
        }
    }

    debug!("nflog receive loop stopped");
}

/// Decode one datagram and publish its packet events.
///
/// A malformed message discards the remainder of the datagram but keeps
/// the loop alive. Returns `Err` only when the consumer side is gone and
/// the loop should stop.
async fn dispatch(
    data: &[u8],
    records: &mpsc::Sender<Packet>,
    errors: &Option<mpsc::Sender<Error>>,
) -> std::result::Result<(), ()> {
    for message in MessageIter::new(data) {
        let (header, payload) = match message {
            Ok(m) => m,
            Err(e) => {
                report(errors, e).await;
                return Ok(());
            }
        };

        if !header.is_packet_event() {
            continue;
        }

        match Packet::from_bytes(payload) {
            Ok(packet) => {
                trace!(group = packet.group, "decoded packet event");
                if records.send(packet).await.is_err() {
                    return Err(());
                }
            }
            Err(e) => {
                report(errors, e).await;
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Push an error to the consumer if error reporting was enabled; a
/// consumer that never drains the channel stalls here, which is the
/// documented contract.
async fn report(errors: &Option<mpsc::Sender<Error>>, err: Error) {
    match errors {
        Some(tx) => {
            let _ = tx.send(err).await;
        }
        None => debug!(error = %err, "nflog error (reporting disabled)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrIter;
    use crate::codec::{CONFIG_CMD_LEN, CONFIG_MODE_LEN, NFULA_CFG_CMD, NFULA_CFG_MODE, NfGenMsg};
    use crate::message::{NFULNL_MSG_PACKET, NLMSG_HDRLEN, NlMsgHdr, nfnl_msg_type};
    use crate::packet::nfula;
    use zerocopy::byteorder::little_endian::U32;

    fn config(groups: &[u16]) -> Config {
        Config::new().groups(groups.iter().copied())
    }

    /// Decode one handshake frame into (seq, body, attr type, value).
    fn split_frame(frame: &[u8]) -> (u32, NfGenMsg, u16, Vec<u8>) {
        let (header, payload) = MessageIter::new(frame).next().unwrap().unwrap();
        let (body, rest) = NfGenMsg::from_prefix(payload).unwrap();
        let (kind, value) = AttrIter::new(rest).next().unwrap().unwrap();
        (header.seq(), body, kind, value.to_vec())
    }

    #[test]
    fn handshake_issues_two_plus_two_per_group() {
        for n in [1usize, 2, 32] {
            let groups: Vec<u16> = (1..=n as u16).collect();
            let frames = handshake_frames(&config(&groups));
            assert_eq!(frames.len(), 2 + 2 * n);
        }
    }

    #[test]
    fn handshake_sequence_numbers_increase_from_zero() {
        let frames = handshake_frames(&config(&[4, 9, 2]));
        for (i, frame) in frames.iter().enumerate() {
            let (seq, _, _, _) = split_frame(frame);
            assert_eq!(seq, i as u32);
        }
    }

    #[test]
    fn handshake_orders_family_then_groups() {
        let frames = handshake_frames(&config(&[7, 3]));

        let (_, body, kind, value) = split_frame(&frames[0]);
        assert_eq!(kind, NFULA_CFG_CMD);
        assert_eq!(value[0], ConfigCmd::PfUnbind as u8);
        assert_eq!(body.family, libc::AF_INET as u8);

        let (_, _, _, value) = split_frame(&frames[1]);
        assert_eq!(value[0], ConfigCmd::PfBind as u8);

        // Groups bound in caller order, bind then mode for each.
        for (i, &group) in [7u16, 3].iter().enumerate() {
            let (_, body, kind, value) = split_frame(&frames[2 + 2 * i]);
            assert_eq!(kind, NFULA_CFG_CMD);
            assert_eq!(value[0], ConfigCmd::Bind as u8);
            assert_eq!(body.res_id, group);
            assert_eq!(frames[2 + 2 * i].len(), CONFIG_CMD_LEN);

            let (_, body, kind, _) = split_frame(&frames[3 + 2 * i]);
            assert_eq!(kind, NFULA_CFG_MODE);
            assert_eq!(body.res_id, group);
            assert_eq!(frames[3 + 2 * i].len(), CONFIG_MODE_LEN);
        }
    }

    /// Build an NLMSG_ERROR reply carrying `errno` for sequence `seq`.
    fn ack_reply(seq: u32, errno: i32) -> Vec<u8> {
        let mut hdr = NlMsgHdr::new(NLMSG_ERROR, 0);
        hdr.nlmsg_len = U32::new((NLMSG_HDRLEN + 4) as u32);
        hdr.nlmsg_seq = U32::new(seq);
        let mut buf = hdr.as_bytes().to_vec();
        buf.extend_from_slice(&errno.to_le_bytes());
        buf
    }

    #[test]
    fn check_ack_accepts_matching_ack() {
        assert!(check_ack(&ack_reply(5, 0), 5).is_ok());
    }

    #[test]
    fn check_ack_rejects_sequence_mismatch() {
        let err = check_ack(&ack_reply(6, 0), 5).unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceMismatch {
                expected: 5,
                actual: 6
            }
        ));
    }

    #[test]
    fn check_ack_surfaces_kernel_errno() {
        let err = check_ack(&ack_reply(5, -libc::EPERM), 5).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EPERM));
    }

    #[test]
    fn check_ack_rejects_empty_reply() {
        assert!(matches!(
            check_ack(&[], 0),
            Err(Error::InvalidMessage(_))
        ));
    }

    /// Build a packet-event datagram containing one record.
    fn packet_event(group: u16, attrs: &[(u16, &[u8])]) -> Vec<u8> {
        use crate::attr::{NlAttr, nla_align};

        let mut body = Vec::new();
        NfGenMsg::new(libc::AF_INET as u8, group).write(&mut body);
        for &(kind, value) in attrs {
            body.extend_from_slice(NlAttr::new(kind, value.len()).as_bytes());
            body.extend_from_slice(value);
            body.resize(nla_align(body.len()), 0);
        }

        let mut hdr = NlMsgHdr::new(nfnl_msg_type(NFULNL_MSG_PACKET), 0);
        hdr.nlmsg_len = U32::new((NLMSG_HDRLEN + body.len()) as u32);
        let mut buf = hdr.as_bytes().to_vec();
        buf.extend_from_slice(&body);
        buf
    }

    #[tokio::test]
    async fn dispatch_delivers_decoded_records() {
        let (tx, mut rx) = mpsc::channel(1);
        let data = packet_event(32, &[(nfula::PREFIX, b"DROP\0")]);

        dispatch(&data, &tx, &None).await.unwrap();

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.group, 32);
        assert_eq!(packet.prefix.as_deref(), Some("DROP"));
    }

    #[tokio::test]
    async fn dispatch_skips_non_packet_messages() {
        let (tx, mut rx) = mpsc::channel(1);
        let data = ack_reply(0, 0);

        dispatch(&data, &tx, &None).await.unwrap();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dispatch_reports_malformed_datagram_and_survives() {
        let (record_tx, mut record_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = mpsc::channel(1);

        // First message is fine, second envelope claims more bytes than
        // remain: the remainder of the datagram is discarded.
        let mut data = packet_event(1, &[]);
        let mut bad = packet_event(2, &[]);
        bad[0..4].copy_from_slice(&1024u32.to_le_bytes());
        data.extend_from_slice(&bad);

        let errors = Some(error_tx);
        dispatch(&data, &record_tx, &errors).await.unwrap();

        let packet = record_rx.recv().await.unwrap();
        assert_eq!(packet.group, 1);

        let err = error_rx.recv().await.unwrap();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn dispatch_signals_stop_when_consumer_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let data = packet_event(1, &[]);
        assert!(dispatch(&data, &tx, &None).await.is_err());
    }

    #[tokio::test]
    async fn report_without_channel_is_a_no_op() {
        report(&None, Error::Config("x".into())).await;
    }

    /// Hands out a fixed sequence of read results, then parks forever.
    struct ScriptedSource {
        replies: std::sync::Mutex<std::collections::VecDeque<Result<Vec<u8>>>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<Vec<u8>>>) -> Self {
            Self {
                replies: std::sync::Mutex::new(replies.into()),
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        async fn recv_msg(&self) -> Result<Vec<u8>> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn os_error(errno: i32) -> Error {
        Error::Io(std::io::Error::from_raw_os_error(errno))
    }

    #[tokio::test]
    async fn receive_loop_survives_kernel_drop_and_keeps_delivering() {
        // ENOBUFS on one read, then a valid record on the next.
        let source = ScriptedSource::new(vec![
            Err(os_error(libc::ENOBUFS)),
            Ok(packet_event(3, &[])),
        ]);
        let (record_tx, mut record_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(receive_loop(
            source,
            record_tx,
            Some(error_tx),
            shutdown_rx,
        ));

        let err = error_rx.recv().await.unwrap();
        assert!(err.is_overrun());

        let packet = record_rx.recv().await.unwrap();
        assert_eq!(packet.group, 3);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn receive_loop_stops_on_fatal_transport_error() {
        let source = ScriptedSource::new(vec![Err(os_error(libc::ECONNRESET))]);
        let (record_tx, mut record_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(receive_loop(source, record_tx, None, shutdown_rx));

        // The loop dropping its sender closes the stream.
        assert!(record_rx.recv().await.is_none());
        task.await.unwrap();
    }
}
