//! Primitive byte-stream facade
//!
//! Thin wrappers over `bytes::{Buf, BufMut}` exposing the primitive
//! reads/writes the AMF3 wire format and externalizable callbacks need
//! (§6). All multi-byte numerics are big-endian (network order), which is
//! `bytes`' default for its `get_*`/`put_*` methods.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::AmfError;
use crate::value::AmfValue;

/// Read-side primitives, plus `read_element` so an externalizable's
/// `read_external` callback can re-enter the element decoder.
pub struct DataInput<'a> {
    pub(crate) buf: &'a mut Bytes,
    pub(crate) decoder: &'a mut Decoder,
}

impl<'a> DataInput<'a> {
    pub(crate) fn new(buf: &'a mut Bytes, decoder: &'a mut Decoder) -> Self {
        DataInput { buf, decoder }
    }

    pub fn read_u8(&mut self) -> Result<u8, AmfError> {
        self.require(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, AmfError> {
        self.require(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16, AmfError> {
        self.require(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16, AmfError> {
        self.require(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u32(&mut self) -> Result<u32, AmfError> {
        self.require(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32, AmfError> {
        self.require(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_f32(&mut self) -> Result<f32, AmfError> {
        self.require(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, AmfError> {
        self.require(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, AmfError> {
        self.require(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn read_utf8(&mut self, len: usize) -> Result<String, AmfError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
    }

    /// Re-enters the element decoder; used by externalizable callbacks.
    pub fn read_element(&mut self) -> Result<AmfValue, AmfError> {
        self.decoder.read_element(self.buf)
    }

    fn require(&self, n: usize) -> Result<(), AmfError> {
        if self.buf.remaining() < n {
            Err(AmfError::EndOfStream)
        } else {
            Ok(())
        }
    }
}

/// Write-side primitives, plus `write_element` so an externalizable's
/// `write_external` callback can re-enter the element encoder.
pub struct DataOutput<'a> {
    pub(crate) buf: &'a mut BytesMut,
    pub(crate) encoder: &'a mut Encoder,
}

impl<'a> DataOutput<'a> {
    pub(crate) fn new(buf: &'a mut BytesMut, encoder: &'a mut Encoder) -> Self {
        DataOutput { buf, encoder }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_utf8(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
    }

    /// Re-enters the element encoder; used by externalizable callbacks.
    pub fn write_element(&mut self, value: &AmfValue) -> Result<(), AmfError> {
        self.encoder.write_element(self.buf, value)
    }
}
