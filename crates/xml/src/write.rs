// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fmt::Display;
use std::io::{self, Write};

/// Unbuffered tag-at-a-time writer; callers wrap the sink in a `BufWriter`.
pub struct XmlOutputStream<W: Write> {
    w: W,
}

impl<W: Write> XmlOutputStream<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    pub fn put_raw(&mut self, s: &str) -> io::Result<()> {
        self.w.write_all(s.as_bytes())
    }

    /// `<name`, left open for attributes.
    pub fn put_start_tag(&mut self, name: &str) -> io::Result<()> {
        write!(self.w, "<{name}")
    }

    /// ` name="value"` with the value escaped.
    pub fn put_attribute(&mut self, name: &str, value: &str) -> io::Result<()> {
        write!(self.w, " {name}=\"")?;
        self.put_escaped(value)?;
        self.w.write_all(b"\"")
    }

    pub fn put_num_attribute(&mut self, name: &str, value: impl Display) -> io::Result<()> {
        write!(self.w, " {name}=\"{value}\"")
    }

    /// `>` — the open tag will have children.
    pub fn finish_tag(&mut self) -> io::Result<()> {
        self.w.write_all(b">")
    }

    /// `/>` — the element is complete.
    pub fn finish_empty(&mut self) -> io::Result<()> {
        self.w.write_all(b"/>")
    }

    /// `</name>`.
    pub fn put_last_tag(&mut self, name: &str) -> io::Result<()> {
        write!(self.w, "</{name}>")
    }

    /// Escaped element text.
    pub fn put_value(&mut self, value: &str) -> io::Result<()> {
        self.put_escaped(value)
    }

    /// `"value"`, escaped, for compact-format tokens.
    pub fn put_quoted(&mut self, value: &str) -> io::Result<()> {
        self.w.write_all(b"\"")?;
        self.put_escaped(value)?;
        self.w.write_all(b"\"")
    }

    pub fn put_num(&mut self, value: impl Display) -> io::Result<()> {
        write!(self.w, "{value}")
    }

    pub fn put_eol(&mut self) -> io::Result<()> {
        self.w.write_all(b"\n")
    }

    fn put_escaped(&mut self, value: &str) -> io::Result<()> {
        for c in value.chars() {
            match c {
                '<' => self.w.write_all(b"&lt;")?,
                '>' => self.w.write_all(b"&gt;")?,
                '&' => self.w.write_all(b"&amp;")?,
                '"' => self.w.write_all(b"&quot;")?,
                '\'' => self.w.write_all(b"&apos;")?,
                // files are written encoding="ASCII"; the reader decodes
                // character references back to the original char
                c if (c as u32) > 127 => write!(self.w, "&#{};", c as u32)?,
                c => write!(self.w, "{c}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{XmlAttr, XmlInputStream};
    use pretty_assertions::assert_eq;

    fn written(f: impl FnOnce(&mut XmlOutputStream<&mut Vec<u8>>)) -> String {
        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        f(&mut w);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn element_shapes() {
        let s = written(|w| {
            w.put_start_tag("attr").unwrap();
            w.put_attribute("name", "x").unwrap();
            w.put_num_attribute("num", 3).unwrap();
            w.finish_empty().unwrap();
            w.put_eol().unwrap();
            w.put_start_tag("rel").unwrap();
            w.finish_tag().unwrap();
            w.put_last_tag("rel").unwrap();
        });
        assert_eq!(s, "<attr name=\"x\" num=\"3\"/>\n<rel></rel>");
    }

    #[test]
    fn escaping_round_trips_through_the_reader() {
        let nasty = "a<b>&\"c'\u{e9}";
        let s = written(|w| {
            w.put_start_tag("a").unwrap();
            w.put_attribute("v", nasty).unwrap();
            w.finish_empty().unwrap();
        });
        let mut r = XmlInputStream::new(s.as_bytes());
        r.get_tag_start().unwrap();
        let XmlAttr::Pair(n, v) = r.get_attribute().unwrap() else {
            panic!("expected a pair");
        };
        assert_eq!(n, "v");
        assert_eq!(v, nasty);
    }
}
