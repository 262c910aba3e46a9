//! Little-endian, length-prefixed payload encoding for journal entries

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::record::{CapturedRequest, Endpoint, HeaderList, RequestId};
use crate::{HookError, Result};

/// Append-only payload builder
#[derive(Debug, Default)]
struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    fn put_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn put_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| HookError::DataTooLarge {
            size: len,
            limit: u32::MAX as usize,
        })?;
        self.put_u32(len);
        Ok(())
    }

    fn put_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.put_len(value.len())?;
        self.data.extend_from_slice(value);
        Ok(())
    }

    fn put_str(&mut self, value: &str) -> Result<()> {
        self.put_bytes(value.as_bytes())
    }

    fn put_opt_str(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) => {
                self.put_u8(1);
                self.put_str(v)
            }
            None => {
                self.put_u8(0);
                Ok(())
            }
        }
    }

    fn put_time(&mut self, value: DateTime<Utc>) {
        self.put_i64(value.timestamp());
        self.put_u32(value.timestamp_subsec_nanos());
    }

    fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over an encoded payload
struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                HookError::InvalidFormat(format!(
                    "Payload truncated: need {len} bytes at offset {}, have {}",
                    self.offset,
                    self.data.len() - self.offset
                ))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| HookError::InvalidFormat(format!("Invalid UTF-8 string: {e}")))
    }

    fn opt_string(&mut self) -> Result<Option<String>> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.string().map(Some),
            flag => Err(HookError::InvalidFormat(format!("Invalid option flag: {flag}"))),
        }
    }

    fn time(&mut self) -> Result<DateTime<Utc>> {
        let secs = self.i64()?;
        let nanos = self.u32()?;
        DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| HookError::InvalidFormat(format!("Invalid timestamp: {secs}.{nanos}")))
    }

    fn finish(self) -> Result<()> {
        if self.offset == self.data.len() {
            Ok(())
        } else {
            Err(HookError::InvalidFormat(format!(
                "{} trailing bytes in payload",
                self.data.len() - self.offset
            )))
        }
    }
}

/// Encode an endpoint, including its creator
///
/// # Errors
///
/// Returns error if a field is too long to encode
pub fn encode_endpoint(endpoint: &Endpoint) -> Result<Vec<u8>> {
    let mut enc = Encoder::with_capacity(64 + endpoint.id.len());
    enc.put_str(&endpoint.id)?;
    enc.put_opt_str(endpoint.alias.as_deref())?;
    enc.put_opt_str(endpoint.creator_id.as_deref())?;
    enc.put_time(endpoint.created_at);
    enc.put_time(endpoint.expires_at);
    Ok(enc.finish())
}

/// Decode an endpoint
///
/// # Errors
///
/// Returns error if the payload is malformed
pub fn decode_endpoint(data: &[u8]) -> Result<Endpoint> {
    let mut dec = Decoder::new(data);
    let endpoint = Endpoint {
        id: dec.string()?,
        alias: dec.opt_string()?,
        creator_id: dec.opt_string()?,
        created_at: dec.time()?,
        expires_at: dec.time()?,
    };
    dec.finish()?;
    Ok(endpoint)
}

/// Encode a bare identifier (endpoint deletion)
///
/// # Errors
///
/// Returns error if the identifier is too long to encode
pub fn encode_id(id: &str) -> Result<Vec<u8>> {
    let mut enc = Encoder::with_capacity(4 + id.len());
    enc.put_str(id)?;
    Ok(enc.finish())
}

/// Decode a bare identifier
///
/// # Errors
///
/// Returns error if the payload is malformed
pub fn decode_id(data: &[u8]) -> Result<String> {
    let mut dec = Decoder::new(data);
    let id = dec.string()?;
    dec.finish()?;
    Ok(id)
}

/// Encode a request identifier (request deletion)
#[must_use]
pub fn encode_request_id(id: RequestId) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

/// Decode a request identifier
///
/// # Errors
///
/// Returns error if the payload is malformed
pub fn decode_request_id(data: &[u8]) -> Result<RequestId> {
    let mut dec = Decoder::new(data);
    let id = dec.i64()?;
    dec.finish()?;
    Ok(id)
}

/// Encode a captured request with all header values and the exact body bytes
///
/// # Errors
///
/// Returns error if a field is too long to encode
pub fn encode_request(request: &CapturedRequest) -> Result<Vec<u8>> {
    let mut enc = Encoder::with_capacity(128 + request.body.len());
    enc.put_i64(request.id);
    enc.put_str(&request.endpoint_id)?;
    enc.put_str(&request.method)?;
    enc.put_str(&request.path)?;
    enc.put_opt_str(request.query.as_deref())?;
    enc.put_str(&request.remote_addr)?;

    let header_count = u16::try_from(request.headers.len()).map_err(|_| HookError::TooManyHeaders {
        count: request.headers.len(),
        limit: u16::MAX as usize,
    })?;
    enc.put_u16(header_count);
    for (name, values) in request.headers.iter() {
        enc.put_str(name)?;
        enc.put_len(values.len())?;
        for value in values {
            enc.put_bytes(value)?;
        }
    }

    enc.put_bytes(&request.body)?;
    enc.put_u16(request.status_code);
    enc.put_time(request.created_at);
    Ok(enc.finish())
}

/// Decode a captured request
///
/// # Errors
///
/// Returns error if the payload is malformed
pub fn decode_request(data: &[u8]) -> Result<CapturedRequest> {
    let mut dec = Decoder::new(data);
    let id = dec.i64()?;
    let endpoint_id = dec.string()?;
    let method = dec.string()?;
    let path = dec.string()?;
    let query = dec.opt_string()?;
    let remote_addr = dec.string()?;

    let header_count = dec.u16()?;
    let mut headers = HeaderList::new();
    for _ in 0..header_count {
        let name = dec.string()?;
        let value_count = dec.u32()?;
        for _ in 0..value_count {
            headers.append(&name, Bytes::copy_from_slice(dec.bytes()?));
        }
    }

    let body = Bytes::copy_from_slice(dec.bytes()?);
    let status_code = dec.u16()?;
    let created_at = dec.time()?;
    dec.finish()?;

    Ok(CapturedRequest {
        id,
        endpoint_id,
        method,
        path,
        query,
        remote_addr,
        headers,
        body,
        status_code,
        created_at,
    })
}
