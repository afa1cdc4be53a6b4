// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Sitemap XML parsing (sitemaps.org 0.9, namespaced or not) and robots.txt
//! sitemap discovery.

pub mod spider;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use url::Url;

pub use spider::{SitemapSpider, SitemapStats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedUrl {
    pub url: Url,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapEntry {
    /// `<url><loc>` inside a `<urlset>`.
    Url(DatedUrl),
    /// `<sitemap><loc>` inside a `<sitemapindex>`.
    Sitemap(Url),
}

/// Local tag name with any namespace prefix stripped; the parser tolerates
/// both namespaced and plain forms.
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

pub fn parse_sitemap(s: &str) -> Vec<SitemapEntry> {
    let mut reader = quick_xml::Reader::from_str(s);

    let mut res = vec![];

    let mut in_sitemap = false;
    let mut in_url = false;
    let mut in_loc = false;
    let mut in_lastmod = false;

    let mut current_url: Option<Url> = None;
    let mut current_lastmod: Option<DateTime<Utc>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"sitemap" => in_sitemap = true,
                b"url" => in_url = true,
                b"loc" => in_loc = true,
                b"lastmod" => in_lastmod = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"sitemap" => in_sitemap = false,
                b"url" => {
                    in_url = false;
                    if let Some(url) = current_url.take() {
                        res.push(SitemapEntry::Url(DatedUrl {
                            url,
                            last_modified: current_lastmod.take(),
                        }));
                    }
                }
                b"loc" => in_loc = false,
                b"lastmod" => in_lastmod = false,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let Ok(text) = e.unescape() else {
                    continue;
                };
                let text = text.trim();

                if in_sitemap && in_loc {
                    if let Ok(url) = Url::parse(text) {
                        res.push(SitemapEntry::Sitemap(url));
                    }
                } else if in_url && in_loc {
                    if let Ok(url) = Url::parse(text) {
                        current_url = Some(url);
                    }
                } else if in_url && in_lastmod {
                    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
                        current_lastmod = Some(date.with_timezone(&Utc));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("failed to parse sitemap: {}", e);
                break;
            }
            _ => (),
        }
    }

    res
}

/// `Sitemap:` lines from a robots.txt body, case-insensitive.
pub fn sitemaps_in_robots(body: &str) -> Vec<Url> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;

            if !key.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }

            Url::parse(value.trim()).ok()
        })
        .collect()
}
