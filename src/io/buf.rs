use byteorder::ByteOrder;
use memchr::memchr;
use std::{io, str};

/// A cursor over a borrowed byte slice, used to decode wire messages without
/// copying. Mirrors the teacher's `io::Buf` trait.
pub trait Buf<'a> {
    fn advance(&mut self, cnt: usize);

    fn get_i8(&mut self) -> io::Result<i8>;

    fn get_u8(&mut self) -> io::Result<u8>;

    fn get_u16<T: ByteOrder>(&mut self) -> io::Result<u16>;

    fn get_i16<T: ByteOrder>(&mut self) -> io::Result<i16>;

    fn get_i32<T: ByteOrder>(&mut self) -> io::Result<i32>;

    fn get_u32<T: ByteOrder>(&mut self) -> io::Result<u32>;

    fn get_str(&mut self, len: usize) -> io::Result<&'a str>;

    fn get_str_nul(&mut self) -> io::Result<&'a str>;

    fn get_bytes(&mut self, len: usize) -> io::Result<&'a [u8]>;

    fn get_bytes_nul(&mut self) -> io::Result<&'a [u8]>;
}

impl<'a> Buf<'a> for &'a [u8] {
    fn advance(&mut self, cnt: usize) {
        *self = &self[cnt..];
    }

    fn get_i8(&mut self) -> io::Result<i8> {
        let val = self[0];
        self.advance(1);
        Ok(val as i8)
    }

    fn get_u8(&mut self) -> io::Result<u8> {
        let val = self[0];
        self.advance(1);
        Ok(val)
    }

    fn get_u16<T: ByteOrder>(&mut self) -> io::Result<u16> {
        let val = T::read_u16(self);
        self.advance(2);
        Ok(val)
    }

    fn get_i16<T: ByteOrder>(&mut self) -> io::Result<i16> {
        let val = T::read_i16(self);
        self.advance(2);
        Ok(val)
    }

    fn get_i32<T: ByteOrder>(&mut self) -> io::Result<i32> {
        let val = T::read_i32(self);
        self.advance(4);
        Ok(val)
    }

    fn get_u32<T: ByteOrder>(&mut self) -> io::Result<u32> {
        let val = T::read_u32(self);
        self.advance(4);
        Ok(val)
    }

    fn get_str(&mut self, len: usize) -> io::Result<&'a str> {
        str::from_utf8(self.get_bytes(len)?)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn get_str_nul(&mut self) -> io::Result<&'a str> {
        str::from_utf8(self.get_bytes_nul()?)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn get_bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        if self.len() < len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let buf = &self[..len];
        self.advance(len);
        Ok(buf)
    }

    fn get_bytes_nul(&mut self) -> io::Result<&'a [u8]> {
        let len = memchr(b'\0', self).ok_or(io::ErrorKind::UnexpectedEof)?;
        let buf = self.get_bytes(len)?;
        self.advance(1);
        Ok(buf)
    }
}
