//! Entities used by the CLI scenarios

use kvmap_common::Expiration;
use kvmap_mapping::{Entity, EntityMapping};

#[derive(Clone, Debug, PartialEq)]
pub struct Person {
    pub id: String,
    pub version: Option<u32>,
    pub firstname: String,
    pub lastname: String,
    pub age: i64,
}

impl Person {
    pub fn new(id: impl Into<String>, firstname: &str, lastname: &str, age: i64) -> Self {
        Self {
            id: id.into(),
            version: None,
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            age,
        }
    }
}

impl Entity for Person {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::<Self>::new()
            .id("id", |p| p.id.clone())
            .version("version", |p| p.version, |p, v| p.version = Some(v))
            .field("firstname", |p| Ok(p.firstname.as_str().into()))
            .field("lastname", |p| Ok(p.lastname.as_str().into()))
            .field("age", |p| Ok(p.age.into()))
            .reader(|r| {
                Ok(Self {
                    id: r.id().to_string(),
                    version: None,
                    firstname: r.get("firstname")?,
                    lastname: r.get("lastname")?,
                    age: r.get("age")?,
                })
            })
    }
}

/// Session record whose expiration is refreshed on every read
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub version: Option<u32>,
    pub user: String,
}

impl Entity for Session {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::<Self>::new()
            .set_name("sessions")
            .id("id", |s| s.id.clone())
            .version("version", |s| s.version, |s, v| s.version = Some(v))
            .field("user", |s| Ok(s.user.as_str().into()))
            .default_expiration(Expiration::Seconds(1800))
            .touch_on_read(true)
            .reader(|r| {
                Ok(Self {
                    id: r.id().to_string(),
                    version: None,
                    user: r.get("user")?,
                })
            })
    }
}
