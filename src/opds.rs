//! OPDS catalog generation.

use crate::formats::EPUB_MIME;
use crate::library::{Catalog, CatalogEntry};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

/// Content type of catalog responses.
pub const CATALOG_CONTENT_TYPE: &str = "application/atom+xml;profile=opds-catalog;charset=utf-8";

const NAVIGATION_TYPE: &str = "application/atom+xml;profile=opds-catalog";
const ACQUISITION_REL: &str = "http://opds-spec.org/acquisition";
const SUBJECT_SCHEME: &str = "http://purl.org/ontology/library/subject";

/// OPDS feed link.
#[derive(Debug, Clone)]
pub struct Link {
    /// Link relation type (e.g., "self", "start", acquisition).
    pub rel: String,
    /// URL of the linked resource.
    pub href: String,
    /// MIME type of the linked resource.
    pub link_type: String,
    /// Optional title for the link.
    pub title: Option<String>,
}

/// OPDS feed builder.
pub struct FeedBuilder<'a> {
    id: String,
    title: String,
    updated: DateTime<Utc>,
    author: Option<(String, String)>,
    links: Vec<Link>,
    entries: Vec<&'a CatalogEntry>,
}

impl<'a> FeedBuilder<'a> {
    /// Create a new feed builder.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated: Utc::now(),
            author: None,
            links: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Set the feed author.
    pub fn author(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.author = Some((name.into(), uri.into()));
        self
    }

    /// Add a self link.
    pub fn self_link(self, href: impl Into<String>) -> Self {
        self.navigation_link("self", href)
    }

    /// Add a start link.
    pub fn start_link(self, href: impl Into<String>) -> Self {
        self.navigation_link("start", href)
    }

    fn navigation_link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.push(Link {
            rel: rel.to_string(),
            href: href.into(),
            link_type: NAVIGATION_TYPE.to_string(),
            title: None,
        });
        self
    }

    /// Add book entries in order.
    pub fn entries(mut self, entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Build the XML feed.
    pub fn build(self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        // Writing to a Vec can't fail
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        feed.push_attribute(("xmlns:dc", "http://purl.org/dc/terms/"));
        feed.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
        let _ = writer.write_event(Event::Start(feed));

        write_text_element(&mut writer, "id", &self.id);
        write_text_element(&mut writer, "title", &self.title);
        write_text_element(&mut writer, "updated", &atom_date(&self.updated));

        if let Some((name, uri)) = &self.author {
            let _ = writer.write_event(Event::Start(BytesStart::new("author")));
            write_text_element(&mut writer, "name", name);
            write_text_element(&mut writer, "uri", uri);
            let _ = writer.write_event(Event::End(BytesEnd::new("author")));
        }

        for link in &self.links {
            write_link(&mut writer, link);
        }

        for entry in &self.entries {
            write_entry(&mut writer, entry);
        }

        let _ = writer.write_event(Event::End(BytesEnd::new("feed")));

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

/// Render a scanned catalog as a feed for clients reaching us at `base_url`.
pub fn catalog_feed(catalog: &Catalog, base_url: &str, catalog_path: &str) -> String {
    FeedBuilder::new(format!("urn:feed:{}", base_url), &catalog.title)
        .author(&catalog.title, base_url)
        .start_link(catalog_path)
        .self_link(catalog_path)
        .entries(&catalog.entries)
        .build()
}

/// Atom timestamp, whole seconds in UTC. Same shape as the default `dc:issued`.
fn atom_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write a simple text element.
fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
    let _ = writer.write_event(Event::Text(BytesText::new(text)));
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

/// Write a link element.
fn write_link<W: std::io::Write>(writer: &mut Writer<W>, link: &Link) {
    let mut elem = BytesStart::new("link");
    elem.push_attribute(("rel", link.rel.as_str()));
    elem.push_attribute(("href", link.href.as_str()));
    elem.push_attribute(("type", link.link_type.as_str()));
    if let Some(title) = &link.title {
        elem.push_attribute(("title", title.as_str()));
    }
    let _ = writer.write_event(Event::Empty(elem));
}

/// Write a book entry.
fn write_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &CatalogEntry) {
    let _ = writer.write_event(Event::Start(BytesStart::new("entry")));

    write_text_element(writer, "id", &entry.id);
    write_text_element(writer, "title", &entry.title);
    write_text_element(writer, "updated", &atom_date(&entry.updated_at));
    write_text_element(writer, "dc:issued", &entry.publication_date);

    if !entry.author.is_empty() {
        let _ = writer.write_event(Event::Start(BytesStart::new("author")));
        write_text_element(writer, "name", &entry.author);
        let _ = writer.write_event(Event::End(BytesEnd::new("author")));
    }

    if !entry.subject.is_empty() {
        let mut elem = BytesStart::new("category");
        elem.push_attribute(("scheme", SUBJECT_SCHEME));
        elem.push_attribute(("term", entry.subject.as_str()));
        elem.push_attribute(("label", entry.subject.as_str()));
        let _ = writer.write_event(Event::Empty(elem));
    }

    if !entry.description.is_empty() {
        let mut elem = BytesStart::new("summary");
        elem.push_attribute(("type", "text"));
        let _ = writer.write_event(Event::Start(elem));
        let _ = writer.write_event(Event::Text(BytesText::new(&entry.description)));
        let _ = writer.write_event(Event::End(BytesEnd::new("summary")));
    }

    write_link(
        writer,
        &Link {
            rel: ACQUISITION_REL.to_string(),
            href: entry.href(),
            link_type: EPUB_MIME.to_string(),
            title: Some(entry.title.clone()),
        },
    );

    let _ = writer.write_event(Event::End(BytesEnd::new("entry")));
}
