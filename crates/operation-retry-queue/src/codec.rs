//! Binary encoding of operations for the on-disk queue.
//!
//! All integers are little-endian. Strings and byte blobs carry a `u32`
//! length prefix. There is no header or version byte; adding one is a
//! format change.
//!
//! ```text
//! [4: type][4+N: bundle][4+N: item_key][4: max_attempts][4: expected_code][8: timestamp_ms]
//! [1: method][4+N: uri][4: header_count]{[4+N: name][4+N: value]}*[4+N: body]
//! ```
//!
//! The layout is strictly sequential, so a truncated record fails at the
//! first field it cannot complete.

use crate::error::{QueueError, QueueResult};
use crate::operation::{Operation, OperationType};
use crate::request::{HttpMethod, HttpRequest};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::error;

/// Upper bound for a single length-prefixed field.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Upper bound for the number of headers in one request.
pub const MAX_HEADER_COUNT: u32 = 1024;

/// Serialize an operation, logging and returning `false` on any failure.
pub fn try_serialize_binary<W: Write>(writer: &mut W, operation: &Operation) -> bool {
    match write_operation(writer, operation) {
        Ok(()) => true,
        Err(e) => {
            error!(
                bundle = %operation.bundle(),
                item_key = %operation.item_key(),
                error = %e,
                "Could not serialize operation"
            );
            false
        }
    }
}

/// Deserialize an operation, logging and returning `None` on any failure.
pub fn try_deserialize_binary<R: Read>(reader: &mut R) -> Option<Operation> {
    match read_operation(reader) {
        Ok(operation) => Some(operation),
        Err(e) => {
            error!(error = %e, "Could not deserialize operation");
            None
        }
    }
}

/// Encode an operation into a fresh buffer.
pub fn encode_operation(operation: &Operation) -> QueueResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(128 + operation.request().body.len());
    write_operation(&mut buf, operation)?;
    Ok(buf)
}

/// Decode an operation from a complete buffer. Trailing bytes are an error.
pub fn decode_operation(data: &[u8]) -> QueueResult<Operation> {
    let mut cursor = data;
    let operation = read_operation(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(QueueError::Codec(format!(
            "{} trailing bytes after operation",
            cursor.len()
        )));
    }
    Ok(operation)
}

pub fn write_operation<W: Write>(writer: &mut W, operation: &Operation) -> QueueResult<()> {
    write_u32(writer, operation.op_type() as u32)?;
    write_str(writer, operation.bundle())?;
    write_str(writer, operation.item_key())?;
    write_u32(writer, operation.max_attempts())?;
    write_u32(writer, u32::from(operation.expected_success_code()))?;
    writer.write_all(&operation.timestamp_ms().to_le_bytes())?;
    write_request(writer, operation.request())
}

pub fn read_operation<R: Read>(reader: &mut R) -> QueueResult<Operation> {
    let raw_type = read_u32(reader)?;
    let op_type = OperationType::from_u32(raw_type)
        .ok_or_else(|| QueueError::Codec(format!("Unknown operation type: {}", raw_type)))?;
    let bundle = read_string(reader)?;
    let item_key = read_string(reader)?;
    let max_attempts = read_u32(reader)?;
    let raw_code = read_u32(reader)?;
    let expected_success_code = u16::try_from(raw_code)
        .map_err(|_| QueueError::Codec(format!("Status code out of range: {}", raw_code)))?;
    let mut timestamp = [0u8; 8];
    reader.read_exact(&mut timestamp)?;
    let timestamp_ms = i64::from_le_bytes(timestamp);
    let request = read_request(reader)?;

    Ok(Operation::with_timestamp(
        op_type,
        bundle,
        item_key,
        request,
        expected_success_code,
        max_attempts,
        timestamp_ms,
    ))
}

pub fn write_request<W: Write>(writer: &mut W, request: &HttpRequest) -> QueueResult<()> {
    writer.write_all(&[request.method as u8])?;
    write_str(writer, &request.uri)?;
    let header_count = u32::try_from(request.headers.len())
        .map_err(|_| QueueError::Codec("Too many headers".to_string()))?;
    write_u32(writer, header_count)?;
    for (name, value) in &request.headers {
        write_str(writer, name)?;
        write_str(writer, value)?;
    }
    write_bytes(writer, &request.body)
}

pub fn read_request<R: Read>(reader: &mut R) -> QueueResult<HttpRequest> {
    let mut method = [0u8; 1];
    reader.read_exact(&mut method)?;
    let method = HttpMethod::from_u8(method[0])
        .ok_or_else(|| QueueError::Codec(format!("Unknown HTTP method byte: {:#04x}", method[0])))?;
    let uri = read_string(reader)?;

    let header_count = read_u32(reader)?;
    if header_count > MAX_HEADER_COUNT {
        return Err(QueueError::Codec(format!(
            "Header count {} exceeds limit {}",
            header_count, MAX_HEADER_COUNT
        )));
    }
    let mut headers = BTreeMap::new();
    for _ in 0..header_count {
        let name = read_string(reader)?;
        let value = read_string(reader)?;
        headers.insert(name, value);
    }

    let body = read_bytes(reader)?;

    Ok(HttpRequest {
        method,
        uri,
        headers,
        body,
    })
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> QueueResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> QueueResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8]) -> QueueResult<()> {
    if data.len() > MAX_FIELD_LEN {
        return Err(QueueError::Codec(format!(
            "Field of {} bytes exceeds limit {}",
            data.len(),
            MAX_FIELD_LEN
        )));
    }
    write_u32(writer, data.len() as u32)?;
    writer.write_all(data)?;
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> QueueResult<()> {
    write_bytes(writer, value.as_bytes())
}

fn read_bytes<R: Read>(reader: &mut R) -> QueueResult<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(QueueError::Codec(format!(
            "Field length {} exceeds limit {}",
            len, MAX_FIELD_LEN
        )));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

fn read_string<R: Read>(reader: &mut R) -> QueueResult<String> {
    let data = read_bytes(reader)?;
    String::from_utf8(data).map_err(|e| QueueError::Codec(format!("Invalid UTF-8: {}", e)))
}
