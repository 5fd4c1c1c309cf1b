//! Column path parser using nom.
//!
//! ```text
//! owner.pet.name      owner.*      *
//! ──┬── ─┬─ ──┬─
//!   │    │    └── terminal column (or `*`)
//!   └────┴── link segments
//! ```

use std::fmt;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::char,
    combinator::{all_consuming, map},
    multi::separated_list1,
};

use crate::error::{RelqError, RelqResult};

/// Last segment of a column path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminal {
    Column(String),
    Wildcard,
}

/// A parsed column path: zero or more link hops, then a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnPath {
    pub links: Vec<String>,
    pub terminal: Terminal,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Name(&'a str),
    Star,
}

impl ColumnPath {
    /// Parse a dotted path such as `owner.pet.*`.
    pub fn parse(input: &str) -> RelqResult<Self> {
        let trimmed = input.trim();
        let segments = match all_consuming(parse_segments)(trimmed) {
            Ok((_, segments)) => segments,
            Err(e) => {
                let position = match &e {
                    nom::Err::Error(err) | nom::Err::Failure(err) => trimmed.len() - err.input.len(),
                    nom::Err::Incomplete(_) => trimmed.len(),
                };
                return Err(RelqError::InvalidColumnPath {
                    path: input.to_string(),
                    position,
                    message: "expected identifier or '*' between dots".to_string(),
                });
            }
        };

        let (last, hops) = match segments.split_last() {
            Some(split) => split,
            None => {
                return Err(RelqError::InvalidColumnPath {
                    path: input.to_string(),
                    position: 0,
                    message: "empty path".to_string(),
                });
            }
        };

        let mut links = Vec::with_capacity(hops.len());
        for (i, seg) in hops.iter().enumerate() {
            match seg {
                Segment::Name(name) => links.push(name.to_string()),
                Segment::Star => {
                    let position = hops[..i].iter().map(segment_len).sum::<usize>() + i;
                    return Err(RelqError::InvalidColumnPath {
                        path: input.to_string(),
                        position,
                        message: "'*' is only allowed as the last segment".to_string(),
                    });
                }
            }
        }

        let terminal = match last {
            Segment::Name(name) => Terminal::Column(name.to_string()),
            Segment::Star => Terminal::Wildcard,
        };

        Ok(Self { links, terminal })
    }

    /// Single-column path on the current table.
    pub fn column(name: &str) -> Self {
        Self {
            links: Vec::new(),
            terminal: Terminal::Column(name.to_string()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.terminal == Terminal::Wildcard
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for link in &self.links {
            write!(f, "{}.", link)?;
        }
        match &self.terminal {
            Terminal::Column(name) => write!(f, "{}", name),
            Terminal::Wildcard => write!(f, "*"),
        }
    }
}

impl std::str::FromStr for ColumnPath {
    type Err = RelqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn segment_len(seg: &Segment<'_>) -> usize {
    match seg {
        Segment::Name(name) => name.len(),
        Segment::Star => 1,
    }
}

/// Parse an identifier segment.
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

fn parse_segment(input: &str) -> IResult<&str, Segment<'_>> {
    alt((
        map(char('*'), |_| Segment::Star),
        map(parse_identifier, Segment::Name),
    ))(input)
}

fn parse_segments(input: &str) -> IResult<&str, Vec<Segment<'_>>> {
    separated_list1(char('.'), parse_segment)(input)
}
