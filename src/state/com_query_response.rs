//! `ComQueryResponse`: relaying the server's answer to the client.
//!
//! The backend scans every complete response packet through the
//! [`ResponseTracker`](crate::protocol::ResponseTracker) and relays each
//! read buffer to the frontend as is. The frontend counts what it writes
//! against the backend's relay length; when the tracker says the response
//! is over and every byte is out, both sides return to `Idle`.

use crate::connection::{Session, Side};
use crate::protocol::{DecodeError, Outcome, Progress, ResponseKind};
use crate::state::{transition, Context, Event, SessionError, State, StateHandler};
use tracing::debug;

pub struct BackendComQueryResponse;

impl StateHandler for BackendComQueryResponse {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let (frontend, backend) = session.split_mut();

        match event {
            Event::Writable => {
                backend.disable_write();
                return Ok(());
            }
            Event::Drive => {
                if !backend.tracker.is_done() {
                    backend.enable_read();
                }
                return Ok(());
            }
            Event::Readable => {}
        }

        if frontend.has_pending_write() {
            backend.disable_read();
            frontend.enable_write();
            return Ok(());
        }
        if backend.read(ctx.pool)? == 0 {
            return Ok(());
        }

        while !backend.tracker.is_done() && backend.has_unscanned_input() {
            let Some(head) = backend.scan_read_buffer()? else {
                break;
            };
            if backend.tracker.on_packet(&head)? == Progress::More {
                let next = head_sequence_after(backend.scanner().last_sequence());
                backend.scanner_mut().expect_packet(Some(next));
            }
        }
        if backend.tracker.is_done() {
            if backend.has_unscanned_input() {
                return Err(DecodeError::UnexpectedPacket {
                    header: backend.peek_packet_header().unwrap_or(0),
                    phase: "the response had already ended",
                }
                .into());
            }
            backend.disable_read();
        }

        backend.relay_to(frontend, ctx.pool)?;
        session.drive(Side::Frontend, ctx)
    }
}

fn head_sequence_after(last: Option<u8>) -> u8 {
    last.map_or(0, |seq| seq.wrapping_add(1))
}

pub struct FrontendComQueryResponse;

impl StateHandler for FrontendComQueryResponse {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let (frontend, backend) = session.split_mut();

        if event == Event::Readable {
            // The next command has to wait for this response
            frontend.disable_read();
            return Ok(());
        }

        let before = frontend.bytes_written();
        let drained = frontend.flush_write_buffer(ctx.pool)?;
        let written = frontend.bytes_written() - before;
        if written > 0 {
            ctx.stats.bytes_downstream(written);
            backend.advance_direct_transfer(written)?;
        }

        if !drained {
            backend.disable_read();
            return Ok(());
        }
        if backend.tracker.is_done() && backend.is_direct_transfer_complete() {
            return finish_response(session, ctx);
        }
        backend.enable_read();
        Ok(())
    }
}

/// The response is fully on the client socket: back to `Idle`.
fn finish_response(session: &mut Session, ctx: &mut Context<'_>) -> Result<(), SessionError> {
    let id = session.id();
    let (frontend, backend) = session.split_mut();

    let outcome = backend.tracker.outcome();
    debug!(
        session = id,
        bytes = backend.direct_transfer_len(),
        packets = backend.tracker.packets(),
        ?outcome,
        "response relayed"
    );

    if let Some(schema) = frontend.pending_schema.take() {
        if outcome == Some(Outcome::Ok) {
            debug!(session = id, schema = %schema, "schema changed");
            frontend.schema = Some(schema);
        }
    }

    frontend.pending_response = ResponseKind::None;
    frontend.reset_direct_transfer();
    backend.reset_direct_transfer();
    frontend.enable_read();
    backend.enable_read();
    let pipelined = frontend.has_unscanned_input();

    transition(session, State::Idle);
    if pipelined {
        session.drive(Side::Frontend, ctx)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::capability;
    use crate::protocol::fixtures::*;
    use crate::state::testing::Harness;
    use crate::state::{SessionError, State};

    #[test]
    fn test_response_in_arbitrary_chunks() {
        let rows: Vec<Vec<u8>> = (0..200)
            .map(|i| row_payload(&[format!("{}", i).as_bytes(), &[b'v'; 100]]))
            .collect();
        let response = framed_all(1, &result_set(&["id", "value"], &rows, true));

        for chunk_size in [1, 7, 64, 1000, response.len()] {
            let mut h = Harness::with_buffer_size(4096);
            h.establish(None);
            h.client.push_inbound(&framed(0, b"\x03SELECT * FROM t"));
            h.pump().unwrap();

            for chunk in response.chunks(chunk_size) {
                assert_eq!(h.session.frontend.state(), State::ComQueryResponse);
                h.server.push_inbound(chunk);
                h.pump().unwrap();
            }
            assert_eq!(h.client.take_written(), response, "chunk size {}", chunk_size);
            assert_eq!(h.session.frontend.state(), State::Idle);
            assert_eq!(h.stats.snapshot().bytes_backend_to_client, response.len() as u64);
        }
    }

    #[test]
    fn test_classic_eof_result_ends_at_final_eof() {
        let rows: Vec<Vec<u8>> = (0..50)
            .map(|i| row_payload(&[format!("{}", i).as_bytes(), &[b'w'; 40]]))
            .collect();
        let response = framed_all(1, &result_set(&["id", "value"], &rows, false));

        for chunk_size in [1, 7, 1000, response.len()] {
            let mut h = Harness::with_buffer_size(4096);
            h.establish(None);
            h.session.frontend.capabilities &= !capability::CLIENT_DEPRECATE_EOF;
            h.client.push_inbound(&framed(0, b"\x03SELECT * FROM t"));
            h.pump().unwrap();

            for chunk in response.chunks(chunk_size) {
                assert_eq!(h.session.frontend.state(), State::ComQueryResponse);
                h.server.push_inbound(chunk);
                h.pump().unwrap();
            }
            assert_eq!(h.client.take_written(), response, "chunk size {}", chunk_size);
            assert_eq!(h.session.frontend.state(), State::Idle);
        }
    }

    #[test]
    fn test_slow_client_pauses_backend() {
        let mut h = Harness::new();
        h.establish(None);
        h.client.push_inbound(&framed(0, b"\x03SELECT 1"));
        h.pump().unwrap();

        let rows: Vec<Vec<u8>> = (0..50).map(|_| row_payload(&[&[b'r'; 200]])).collect();
        let response = framed_all(1, &result_set(&["c"], &rows, true));
        h.client.set_write_capacity(100);
        h.server.push_inbound(&response);
        h.pump().unwrap();

        assert!(h.session.frontend.has_pending_write());
        assert!(!h.session.backend.interest().is_readable());
        assert_eq!(h.session.frontend.state(), State::ComQueryResponse);

        h.client.set_write_capacity(usize::MAX);
        h.pump().unwrap();
        assert_eq!(h.client.written(), response);
        assert_eq!(h.session.frontend.state(), State::Idle);
    }

    #[test]
    fn test_init_db_commits_schema_on_ok() {
        let mut h = Harness::new();
        h.establish(Some("first"));

        h.client.push_inbound(&framed(0, b"\x02second"));
        h.pump().unwrap();
        h.server.push_inbound(&framed(1, &ok_payload(0x0002)));
        h.pump().unwrap();

        assert_eq!(h.session.frontend.schema.as_deref(), Some("second"));
        assert!(h.session.frontend.pending_schema.is_none());
    }

    #[test]
    fn test_init_db_keeps_schema_on_err() {
        let mut h = Harness::new();
        h.establish(Some("first"));

        h.client.push_inbound(&framed(0, b"\x02missing"));
        h.pump().unwrap();
        h.server
            .push_inbound(&framed(1, &err_payload(1049, "Unknown database 'missing'")));
        h.pump().unwrap();

        assert_eq!(h.session.frontend.schema.as_deref(), Some("first"));
        assert_eq!(h.session.frontend.state(), State::Idle);
    }

    #[test]
    fn test_trailing_bytes_after_response_are_a_violation() {
        let mut h = Harness::new();
        h.establish(None);
        h.client.push_inbound(&framed(0, b"\x0e"));
        h.pump().unwrap();

        let mut response = framed(1, &ok_payload(0x0002));
        response.extend_from_slice(&framed(2, &ok_payload(0x0002)));
        h.server.push_inbound(&response);

        assert!(matches!(h.pump(), Err(SessionError::Protocol(_))));
        h.teardown();
        assert_eq!(h.pool.stats().outstanding, 0);
    }

    #[test]
    fn test_response_sequence_must_follow_command() {
        let mut h = Harness::new();
        h.establish(None);
        h.client.push_inbound(&framed(0, b"\x0e"));
        h.pump().unwrap();

        h.server.push_inbound(&framed(5, &ok_payload(0x0002)));
        assert!(matches!(h.pump(), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_change_user_reenters_authentication() {
        let mut h = Harness::new();
        h.establish(None);

        h.client.push_inbound(&framed(0, b"\x11other\0\x00"));
        h.pump().unwrap();
        assert_eq!(h.session.frontend.state(), State::Authenticating);

        h.server.push_inbound(&framed(1, &ok_payload(0x0002)));
        h.pump().unwrap();
        assert_eq!(h.session.frontend.state(), State::Idle);
    }
}
