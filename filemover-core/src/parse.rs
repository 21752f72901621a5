//! Builds a [`ParsedItem`] from the preprocessor parse tree the wiki returns.
//!
//! The external parser emits XML of the form
//! `<root>text<template><title>T</title><part><name>k</name>=<value>v</value></part></template></root>`.
//! Templates become [`TemplateNode`]s. Everything else (headings, extension
//! tags, template arguments, `<ignore>` sections) is flattened back into
//! wikitext and kept as free text, so nothing in the page is lost.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::contract::Wiki;
use crate::error::TransferError;
use crate::tree::{ParamValue, ParsedItem, TemplateNode};

/// Parse `raw_text` through the wiki's structural parser.
pub async fn parse<W>(wiki: &W, raw_text: &str, title_context: &str) -> Result<ParsedItem, TransferError>
where
    W: Wiki + ?Sized,
{
    let xml = wiki
        .parse_tree(raw_text, title_context)
        .await
        .map_err(|e| TransferError::Parse {
            title: title_context.to_string(),
            reason: e.to_string(),
        })?;
    debug!(title = title_context, bytes = xml.len(), "[PARSE] Received parse tree");
    from_parse_tree(&xml).map_err(|reason| TransferError::Parse {
        title: title_context.to_string(),
        reason,
    })
}

/// Build a tree from parse-tree XML. Fails only when the XML itself is unreadable.
pub fn from_parse_tree(xml: &str) -> Result<ParsedItem, String> {
    let mut reader = TreeReader {
        reader: Reader::from_str(xml),
    };
    // Some endpoints hand back the bare children of <root>.
    reader.sequence(b"root")
}

struct TreeReader<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> TreeReader<'a> {
    fn next(&mut self) -> Result<Event<'a>, String> {
        self.reader
            .read_event()
            .map_err(|e| format!("malformed parse tree at byte {}: {e}", self.reader.buffer_position()))
    }

    /// Read children until the closing `end` tag (or end of input).
    fn sequence(&mut self, end: &[u8]) -> Result<ParsedItem, String> {
        let mut item = ParsedItem::new();
        loop {
            match self.next()? {
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| e.to_string())?;
                    item.push_text(&text);
                }
                Event::CData(data) => item.push_text(&String::from_utf8_lossy(&data)),
                Event::Start(start) => match start.name().as_ref() {
                    b"root" => {}
                    b"template" => {
                        let node = self.template()?;
                        item.push_template(node);
                    }
                    b"comment" => {
                        let comment = self.flat(b"comment")?;
                        item.push_comment(&comment);
                    }
                    b"ext" => {
                        let ext = self.ext()?;
                        item.push_text(&ext);
                    }
                    other => {
                        let other = other.to_vec();
                        let text = self.flat_element(&other)?;
                        item.push_text(&text);
                    }
                },
                Event::End(close) if close.name().as_ref() == end => return Ok(item),
                Event::Eof => return Ok(item),
                _ => {}
            }
        }
    }

    fn template(&mut self) -> Result<TemplateNode, String> {
        let mut node = TemplateNode::new("");
        let mut positional = 0usize;
        loop {
            match self.next()? {
                Event::Start(start) => match start.name().as_ref() {
                    b"title" => node.title = self.flat(b"title")?.trim().to_string(),
                    b"part" => {
                        let (key, value) = self.part(&mut positional)?;
                        if node.has(&key) {
                            // Later duplicates win, as they do when the page renders.
                            warn!(template = %node.title, key = %key, "[PARSE] Duplicate template parameter");
                        }
                        node.put(&key, value);
                    }
                    other => {
                        let other = other.to_vec();
                        self.flat(&other)?;
                    }
                },
                Event::End(close) if close.name().as_ref() == b"template" => return Ok(node),
                Event::Eof => return Err("unterminated <template>".to_string()),
                _ => {}
            }
        }
    }

    fn part(&mut self, positional: &mut usize) -> Result<(String, ParamValue), String> {
        let mut key: Option<String> = None;
        let mut indexed = false;
        let mut value = ParsedItem::new();
        loop {
            match self.next()? {
                Event::Empty(empty) if empty.name().as_ref() == b"name" => {
                    key = index_attribute(&empty)?;
                    indexed = key.is_some();
                }
                Event::Start(start) => match start.name().as_ref() {
                    b"name" => {
                        if let Some(index) = index_attribute(&start)? {
                            self.flat(b"name")?;
                            key = Some(index);
                            indexed = true;
                        } else {
                            key = Some(self.flat(b"name")?.trim().to_string());
                        }
                    }
                    b"value" => value = self.sequence(b"value")?,
                    other => {
                        let other = other.to_vec();
                        self.flat(&other)?;
                    }
                },
                Event::End(close) if close.name().as_ref() == b"part" => break,
                Event::Eof => return Err("unterminated <part>".to_string()),
                _ => {}
            }
        }

        // Explicit keys, numbered ones included, are trimmed and do not count
        // towards the numbering of unnamed parameters.
        let named = !indexed && matches!(&key, Some(k) if !k.is_empty());
        let key = match key {
            Some(k) if !k.is_empty() => {
                if indexed {
                    if let Ok(index) = k.parse::<usize>() {
                        *positional = index;
                    }
                }
                k
            }
            _ => {
                *positional += 1;
                positional.to_string()
            }
        };

        let value = if value.has_templates() {
            ParamValue::Tree(value)
        } else if named {
            ParamValue::Text(value.to_wikitext().trim().to_string())
        } else {
            ParamValue::Text(value.to_wikitext())
        };
        Ok((key, value))
    }

    /// `<ext><name>ref</name><attr> a="b"</attr><inner>x</inner><close>&lt;/ref&gt;</close></ext>`
    fn ext(&mut self) -> Result<String, String> {
        let (mut name, mut attr, mut inner, mut close) = (String::new(), String::new(), None, String::new());
        loop {
            match self.next()? {
                Event::Start(start) => match start.name().as_ref() {
                    b"name" => name = self.flat(b"name")?,
                    b"attr" => attr = self.flat(b"attr")?,
                    b"inner" => inner = Some(self.flat(b"inner")?),
                    b"close" => close = self.flat(b"close")?,
                    other => {
                        let other = other.to_vec();
                        self.flat(&other)?;
                    }
                },
                Event::End(end) if end.name().as_ref() == b"ext" => break,
                Event::Eof => return Err("unterminated <ext>".to_string()),
                _ => {}
            }
        }
        Ok(match inner {
            Some(inner) => format!("<{name}{attr}>{inner}{close}"),
            None => format!("<{name}{attr}/>"),
        })
    }

    /// Flatten an element that was just opened, restoring its wikitext delimiters.
    fn flat_element(&mut self, name: &[u8]) -> Result<String, String> {
        let inner = self.flat(name)?;
        Ok(match name {
            b"template" => format!("{{{{{inner}}}}}"),
            b"tplarg" => format!("{{{{{{{inner}}}}}}}"),
            b"part" => format!("|{inner}"),
            _ => inner,
        })
    }

    /// Read everything up to the closing `end` tag back as wikitext.
    fn flat(&mut self, end: &[u8]) -> Result<String, String> {
        let mut out = String::new();
        loop {
            match self.next()? {
                Event::Text(text) => out.push_str(&text.unescape().map_err(|e| e.to_string())?),
                Event::CData(data) => out.push_str(&String::from_utf8_lossy(&data)),
                Event::Start(start) if start.name().as_ref() == b"ext" => out.push_str(&self.ext()?),
                Event::Start(start) => {
                    let name = start.name().as_ref().to_vec();
                    out.push_str(&self.flat_element(&name)?);
                }
                Event::End(close) if close.name().as_ref() == end => return Ok(out),
                Event::Eof => return Ok(out),
                _ => {}
            }
        }
    }
}

fn index_attribute(element: &BytesStart<'_>) -> Result<Option<String>, String> {
    match element.try_get_attribute("index").map_err(|e| e.to_string())? {
        Some(attr) => Ok(Some(
            attr.unescape_value().map_err(|e| e.to_string())?.into_owned(),
        )),
        None => Ok(None),
    }
}
