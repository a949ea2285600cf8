use crate::codec::{self, Decode, Encode};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid {kind} code {code:?}")]
pub struct Error {
    kind: &'static str,
    code: String,
}

fn is_code(code: &str) -> bool {
    (2..=3).contains(&code.len()) && code.bytes().all(|byte| byte.is_ascii_alphabetic())
}

/// A lower-case language code, e.g. `eng` or `ru`.
///
/// Besides real codes a [`Lang`] can hold the `[none]` and `[any]` rule
/// sentinels, which is how content language rules express "no language" and
/// "some language".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lang(String);

impl Lang {
    pub fn none() -> Self {
        Self(crate::condition::NONE.to_string())
    }

    pub fn any() -> Self {
        Self(crate::condition::ANY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Lang {
    type Err = Error;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = code.trim().to_lowercase();

        if is_code(&code) || code == crate::condition::NONE || code == crate::condition::ANY {
            Ok(Self(code))
        } else {
            Err(Error {
                kind: "language",
                code,
            })
        }
    }
}

/// An upper-case country code, e.g. `US`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Country(String);

impl Country {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Country {
    type Err = Error;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let code = code.trim().to_uppercase();

        if is_code(&code) {
            Ok(Self(code))
        } else {
            Err(Error {
                kind: "country",
                code,
            })
        }
    }
}

macro_rules! impl_code_traits {
    ($($code:ident),*) => {
        $(
            impl AsRef<str> for $code {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $code {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl TryFrom<String> for $code {
                type Error = Error;

                fn try_from(code: String) -> Result<Self, Self::Error> {
                    code.parse()
                }
            }

            impl From<$code> for String {
                fn from(code: $code) -> Self {
                    code.0
                }
            }

            impl Encode for $code {
                fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
                    self.0.encode(writer)
                }
            }

            // Snapshots only ever contain codes that passed `FromStr`.
            impl Decode for $code {
                fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
                    String::decode(reader).map(Self)
                }
            }
        )*
    };
}

impl_code_traits!(Lang, Country);

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn codes_are_normalized() {
        let lang: Lang = " ENG ".parse().expect("Should parse");
        assert_eq!("eng", lang.as_str());

        let country: Country = "us".parse().expect("Should parse");
        assert_eq!("US", country.as_str());
    }

    #[test]
    fn sentinels_are_languages_but_not_countries() {
        assert_eq!(Ok(Lang::any()), "[ANY]".parse::<Lang>());
        assert!("[any]".parse::<Country>().is_err());
        assert!("english".parse::<Lang>().is_err());
    }
}
