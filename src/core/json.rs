// Streaming JSON emitter: structural tokens plus scalars over any io::Write.
// Memory use is bounded by nesting depth, never by document size. String
// escaping and float formatting delegate to serde_json.
use std::io::Write;

use crate::core::error::{Error, ErrorKind};

enum Frame {
    Object { count: usize },
    Array { count: usize },
}

pub struct JsonWriter<W: Write> {
    out: W,
    stack: Vec<Frame>,
    pending_value: bool,
    done: bool,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            stack: Vec::new(),
            pending_value: false,
            done: false,
        }
    }

    pub fn begin_object(&mut self) -> Result<(), Error> {
        self.value_prefix()?;
        self.stack.push(Frame::Object { count: 0 });
        self.raw(b"{")
    }

    pub fn end_object(&mut self) -> Result<(), Error> {
        if self.pending_value {
            return Err(structural("property is missing its value"));
        }
        match self.stack.pop() {
            Some(Frame::Object { .. }) => {}
            _ => return Err(structural("no open object to end")),
        }
        self.raw(b"}")?;
        self.after_value();
        Ok(())
    }

    pub fn begin_array(&mut self) -> Result<(), Error> {
        self.value_prefix()?;
        self.stack.push(Frame::Array { count: 0 });
        self.raw(b"[")
    }

    pub fn end_array(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(Frame::Array { .. }) => {}
            _ => return Err(structural("no open array to end")),
        }
        self.raw(b"]")?;
        self.after_value();
        Ok(())
    }

    pub fn property(&mut self, name: &str) -> Result<(), Error> {
        if self.pending_value {
            return Err(structural("previous property has no value"));
        }
        match self.stack.last_mut() {
            Some(Frame::Object { count }) => {
                let first = *count == 0;
                *count += 1;
                if !first {
                    self.raw(b",")?;
                }
            }
            _ => return Err(structural("property outside an object")),
        }
        self.encoded(name)?;
        self.raw(b":")?;
        self.pending_value = true;
        Ok(())
    }

    pub fn string(&mut self, value: &str) -> Result<(), Error> {
        self.value_prefix()?;
        self.encoded(value)?;
        self.after_value();
        Ok(())
    }

    pub fn bool(&mut self, value: bool) -> Result<(), Error> {
        self.value_prefix()?;
        self.raw(if value { b"true" } else { b"false" })?;
        self.after_value();
        Ok(())
    }

    pub fn int(&mut self, value: i64) -> Result<(), Error> {
        self.value_prefix()?;
        write!(self.out, "{value}").map_err(io_error)?;
        self.after_value();
        Ok(())
    }

    pub fn uint(&mut self, value: u64) -> Result<(), Error> {
        self.value_prefix()?;
        write!(self.out, "{value}").map_err(io_error)?;
        self.after_value();
        Ok(())
    }

    pub fn float(&mut self, value: f64) -> Result<(), Error> {
        self.value_prefix()?;
        // serde_json emits null for non-finite doubles.
        self.encoded(&value)?;
        self.after_value();
        Ok(())
    }

    pub fn null(&mut self) -> Result<(), Error> {
        self.value_prefix()?;
        self.raw(b"null")?;
        self.after_value();
        Ok(())
    }

    /// Completes the document and flushes the underlying stream.
    pub fn finish(&mut self) -> Result<(), Error> {
        if !self.done {
            return Err(structural("document is incomplete"));
        }
        self.out.flush().map_err(io_error)
    }

    fn value_prefix(&mut self) -> Result<(), Error> {
        if self.done {
            return Err(structural("document is already complete"));
        }
        if self.pending_value {
            self.pending_value = false;
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(Frame::Array { count }) => {
                let first = *count == 0;
                *count += 1;
                if !first {
                    self.raw(b",")?;
                }
                Ok(())
            }
            Some(Frame::Object { .. }) => Err(structural("value without a property name")),
            None => Ok(()),
        }
    }

    fn after_value(&mut self) {
        if self.stack.is_empty() {
            self.done = true;
        }
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.out.write_all(bytes).map_err(io_error)
    }

    fn encoded(&mut self, value: &(impl serde::Serialize + ?Sized)) -> Result<(), Error> {
        serde_json::to_writer(&mut self.out, value).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("json encode failed")
                .with_source(err)
        })
    }
}

fn structural(message: &str) -> Error {
    Error::new(ErrorKind::Internal).with_message(message)
}

fn io_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io).with_source(err)
}
