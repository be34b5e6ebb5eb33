use crate::gate::SubsystemGroup;
use crate::signals::{SignalId, SignalValue};
use crate::transport::FrameRecord;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_COMMAND_SIZE: usize = 512;
pub const MAX_RESPONSE_SIZE: usize = 4096;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    #[serde(default)]
    pub timestamp: u64,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    Status,
    SetSignal { signal: SignalId, value: SignalValue },
    GetSignal { signal: SignalId },
    SetGroup { group: SubsystemGroup, enabled: bool },
    GetFrames,
    /// Turn the connection into a frame monitor stream.
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub timestamp: u64,
    pub status: ResponseStatus,
    pub message: Option<alloc::string::String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
    NegativeAck,
}

/// Snapshot returned by `Status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub running: bool,
    pub uptime_ms: u64,
    pub command_count: u32,
    pub frames_sent: u32,
    pub send_failures: u32,
    pub signals: alloc::vec::Vec<SignalReading>,
    pub groups: alloc::vec::Vec<GroupReading>,
    pub frames: alloc::vec::Vec<FrameRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalReading {
    pub signal: SignalId,
    pub value: SignalValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupReading {
    pub group: SubsystemGroup,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Message exceeds buffer size")]
    MessageTooLarge,
    #[error("Serialization failed")]
    SerializationError,
    #[error("Invalid command")]
    InvalidCommand,
}

#[derive(Debug)]
pub struct ProtocolHandler {
    response_counter: u32,
    command_buffer: CommandBuffer,
    response_buffer: ResponseBuffer,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            response_counter: 0,
            command_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
        }
    }

    pub fn parse_command(&mut self, json_str: &str) -> Result<Command, ProtocolError> {
        self.command_buffer.clear();
        self.command_buffer
            .try_push_str(json_str.trim())
            .map_err(|_| ProtocolError::MessageTooLarge)?;

        serde_json::from_str::<Command>(&self.command_buffer).map_err(|_| ProtocolError::InvalidJson)
    }

    pub fn serialize_response(&mut self, response: &CommandResponse) -> Result<&str, ProtocolError> {
        self.response_buffer.clear();

        let json_str =
            serde_json::to_string(response).map_err(|_| ProtocolError::SerializationError)?;
        self.response_buffer
            .try_push_str(&json_str)
            .map_err(|_| ProtocolError::MessageTooLarge)?;

        Ok(&self.response_buffer)
    }

    pub fn validate_command(&self, command: &Command) -> Result<(), ProtocolError> {
        if command.id == 0 {
            return Err(ProtocolError::InvalidCommand);
        }
        Ok(())
    }

    pub fn create_response(
        &mut self,
        command_id: u32,
        status: ResponseStatus,
        message: Option<&str>,
        timestamp: u64,
    ) -> CommandResponse {
        self.response_counter = self.response_counter.wrapping_add(1);
        CommandResponse {
            id: command_id,
            timestamp,
            status,
            message: message.map(alloc::string::ToString::to_string),
        }
    }

    pub fn create_nack_response(&mut self, command_id: u32, reason: &str, timestamp: u64) -> CommandResponse {
        self.create_response(command_id, ResponseStatus::NegativeAck, Some(reason), timestamp)
    }

    pub fn responses_created(&self) -> u32 {
        self.response_counter
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
