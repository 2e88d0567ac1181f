//! Response Tracking
//!
//! The proxy relays server responses without buffering them, so it needs a
//! way to tell where a response ends. [`ResponseTracker`] is fed the head of
//! every complete backend packet and answers "more" or "done".
//!
//! ```text
//! ResultSet:  First ─┬─ OK / ERR ──────────────────────────────────> Done
//!                    └─ column count ─> Columns ─> [EOF] ─> Rows ─> EOF/OK
//!                                                                     │
//!                         SERVER_MORE_RESULTS_EXISTS ─> First <───────┘
//!
//! Prepare:    First ─> OK_stmt ─> Params ─> [EOF] ─> Columns ─> [EOF] ─> Done
//! ```
//!
//! The bracketed EOF packets are absent when both peers negotiated
//! `CLIENT_DEPRECATE_EOF`; result sets then end with an OK packet whose
//! header byte is `0xFE`.

use crate::protocol::codec::{get_lenenc_int, DecodeError};
use crate::protocol::packet::{PacketHead, MAX_PAYLOAD_LEN};
use crate::protocol::types::{eof_status_flags, header, ok_status_flags, status, Command};

/// The shape of response a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    /// The server does not answer
    #[default]
    None,
    /// Exactly one packet (OK, ERR or a plain reply)
    Single,
    /// Zero or more result sets
    ResultSet,
    /// `COM_STMT_PREPARE` metadata
    Prepare,
    /// Column definitions until EOF
    FieldList,
    /// Rows until EOF
    Rows,
    /// A new authentication exchange (`COM_CHANGE_USER`)
    Auth,
}

impl ResponseKind {
    /// The response shape of `command`. Replication commands have none
    /// because the proxy refuses them.
    pub fn of(command: Command) -> Option<Self> {
        let kind = match command {
            Command::StmtClose | Command::StmtSendLongData => ResponseKind::None,
            Command::Query | Command::StmtExecute | Command::ProcessInfo => ResponseKind::ResultSet,
            Command::StmtPrepare => ResponseKind::Prepare,
            Command::FieldList => ResponseKind::FieldList,
            Command::StmtFetch => ResponseKind::Rows,
            Command::ChangeUser => ResponseKind::Auth,
            Command::BinlogDump | Command::BinlogDumpGtid | Command::RegisterReplica => {
                return None
            }
            _ => ResponseKind::Single,
        };
        Some(kind)
    }
}

/// Whether more packets belong to the current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    More,
    Done,
}

/// How a finished response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    First,
    Columns { left: u64 },
    ColumnsEof,
    Rows,
    Params { left: u64, columns: u64 },
    ParamsEof { columns: u64 },
    PrepareColumns { left: u64 },
    PrepareColumnsEof,
    Definitions,
    Done,
}

/// `SERVER_STATUS_CURSOR_EXISTS`: rows will be fetched with `COM_STMT_FETCH`.
const CURSOR_EXISTS: u16 = 0x0040;

/// Follows one backend response packet by packet.
#[derive(Debug, Clone)]
pub struct ResponseTracker {
    kind: ResponseKind,
    deprecate_eof: bool,
    phase: Phase,
    outcome: Option<Outcome>,
    packets: u64,
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self {
            kind: ResponseKind::None,
            deprecate_eof: false,
            phase: Phase::Done,
            outcome: None,
            packets: 0,
        }
    }
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares for the response to a command of `kind`.
    pub fn reset(&mut self, kind: ResponseKind, deprecate_eof: bool) {
        self.kind = kind;
        self.deprecate_eof = deprecate_eof;
        self.outcome = None;
        self.packets = 0;
        self.phase = match kind {
            ResponseKind::None => Phase::Done,
            _ => Phase::First,
        };
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// How the response ended, once it has.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Packets seen since the last reset.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Advances past one complete packet.
    pub fn on_packet(&mut self, head: &PacketHead) -> Result<Progress, DecodeError> {
        self.packets += 1;
        let first = head.first_byte();

        let phase = self.phase;
        self.phase = match phase {
            Phase::Done => {
                return Err(DecodeError::UnexpectedPacket {
                    header: first.unwrap_or(0),
                    phase: "no response was pending",
                })
            }

            _ if first == Some(header::ERR) && self.accepts_err() => self.finish(Outcome::Err),

            Phase::First => self.first_packet(head)?,

            Phase::Columns { left } => match left - 1 {
                0 if self.deprecate_eof => Phase::Rows,
                0 => Phase::ColumnsEof,
                left => Phase::Columns { left },
            },

            Phase::ColumnsEof => {
                let flags = self.expect_eof(head, "reading column definitions")?;
                if flags & CURSOR_EXISTS != 0 {
                    self.finish(Outcome::Ok)
                } else {
                    Phase::Rows
                }
            }

            Phase::Rows => {
                if self.is_terminator(head) {
                    let flags = self.terminator_flags(head)?;
                    self.end_of_result(flags)
                } else {
                    Phase::Rows
                }
            }

            Phase::Params { left, columns } => match left - 1 {
                0 if self.deprecate_eof => self.after_params(columns),
                0 => Phase::ParamsEof { columns },
                left => Phase::Params { left, columns },
            },

            Phase::ParamsEof { columns } => {
                self.expect_eof(head, "reading parameter definitions")?;
                self.after_params(columns)
            }

            Phase::PrepareColumns { left } => match left - 1 {
                0 if self.deprecate_eof => self.finish(Outcome::Ok),
                0 => Phase::PrepareColumnsEof,
                left => Phase::PrepareColumns { left },
            },

            Phase::PrepareColumnsEof => {
                self.expect_eof(head, "reading statement columns")?;
                self.finish(Outcome::Ok)
            }

            Phase::Definitions => {
                if self.is_terminator(head) {
                    self.finish(Outcome::Ok)
                } else {
                    Phase::Definitions
                }
            }
        };

        Ok(if self.is_done() {
            Progress::Done
        } else {
            Progress::More
        })
    }

    fn first_packet(&mut self, head: &PacketHead) -> Result<Phase, DecodeError> {
        let first = head.first_byte();

        let phase = match self.kind {
            // COM_STATISTICS answers with a bare string, so anything but ERR is fine
            ResponseKind::None | ResponseKind::Single | ResponseKind::Auth => {
                self.finish(Outcome::Ok)
            }
            ResponseKind::ResultSet => match first {
                Some(header::OK) => {
                    let flags = ok_status_flags(head.payload()).ok_or(DecodeError::Malformed {
                        packet: "OK",
                        reason: "truncated status flags",
                    })?;
                    self.end_of_result(flags)
                }
                Some(header::LOCAL_INFILE) => {
                    return Err(DecodeError::Unsupported("LOCAL INFILE"));
                }
                _ => {
                    let mut payload = head.payload();
                    match get_lenenc_int(&mut payload) {
                        Some(0) | None => {
                            return Err(DecodeError::Malformed {
                                packet: "column count",
                                reason: "invalid column count",
                            })
                        }
                        Some(left) => Phase::Columns { left },
                    }
                }
            },
            ResponseKind::Prepare => {
                let payload = head.payload();
                if first != Some(header::OK) || payload.len() < 9 {
                    return Err(DecodeError::Malformed {
                        packet: "COM_STMT_PREPARE_OK",
                        reason: "missing statement header",
                    });
                }
                let columns = u16::from_le_bytes([payload[5], payload[6]]) as u64;
                let params = u16::from_le_bytes([payload[7], payload[8]]) as u64;
                if params > 0 {
                    Phase::Params {
                        left: params,
                        columns,
                    }
                } else {
                    self.after_params(columns)
                }
            }
            ResponseKind::FieldList => {
                if self.is_terminator(head) {
                    self.finish(Outcome::Ok)
                } else {
                    Phase::Definitions
                }
            }
            ResponseKind::Rows => {
                if self.is_terminator(head) {
                    let flags = self.terminator_flags(head)?;
                    self.end_of_result(flags)
                } else {
                    Phase::Rows
                }
            }
        };
        Ok(phase)
    }

    /// ERR may replace any packet except in the middle of a definition block.
    fn accepts_err(&self) -> bool {
        matches!(self.phase, Phase::First | Phase::Rows | Phase::Definitions)
    }

    fn finish(&mut self, outcome: Outcome) -> Phase {
        self.outcome = Some(outcome);
        Phase::Done
    }

    fn after_params(&mut self, columns: u64) -> Phase {
        if columns > 0 {
            Phase::PrepareColumns { left: columns }
        } else {
            self.finish(Outcome::Ok)
        }
    }

    fn end_of_result(&mut self, flags: u16) -> Phase {
        if flags & status::SERVER_MORE_RESULTS_EXISTS != 0 && self.kind == ResponseKind::ResultSet {
            Phase::First
        } else {
            self.finish(Outcome::Ok)
        }
    }

    /// True if `head` is the packet that closes a row or definition block.
    fn is_terminator(&self, head: &PacketHead) -> bool {
        if head.first_byte() != Some(header::EOF) {
            return false;
        }
        if self.deprecate_eof {
            head.payload_len < MAX_PAYLOAD_LEN
        } else {
            head.payload_len < 9
        }
    }

    fn terminator_flags(&self, head: &PacketHead) -> Result<u16, DecodeError> {
        let flags = if self.deprecate_eof {
            ok_status_flags(head.payload())
        } else {
            eof_status_flags(head.payload())
        };
        flags.ok_or(DecodeError::Malformed {
            packet: "EOF",
            reason: "truncated status flags",
        })
    }

    fn expect_eof(&self, head: &PacketHead, phase: &'static str) -> Result<u16, DecodeError> {
        if head.first_byte() != Some(header::EOF) || head.payload_len >= 9 {
            return Err(DecodeError::UnexpectedPacket {
                header: head.first_byte().unwrap_or(0),
                phase,
            });
        }
        eof_status_flags(head.payload()).ok_or(DecodeError::Malformed {
            packet: "EOF",
            reason: "truncated status flags",
        })
    }
}
