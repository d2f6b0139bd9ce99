//! The declared set of assets pre-populated on install.

use url::Url;

use crate::error::{Error, Result};

/// Absolute URLs of every asset a generation must contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
  urls: Vec<Url>,
}

impl Manifest {
  /// Resolve manifest paths (e.g. `/index.html`) against the application origin.
  /// Duplicate entries collapse to one.
  pub fn resolve<S: AsRef<str>>(origin: &Url, paths: &[S]) -> Result<Self> {
    let mut urls: Vec<Url> = Vec::with_capacity(paths.len());
    for path in paths {
      let path = path.as_ref();
      let mut url = origin.join(path).map_err(|e| Error::InvalidUrl {
        url: path.to_string(),
        reason: e.to_string(),
      })?;
      url.set_fragment(None);
      if !urls.contains(&url) {
        urls.push(url);
      }
    }
    Ok(Self { urls })
  }

  pub fn urls(&self) -> &[Url] {
    &self.urls
  }

  pub fn len(&self) -> usize {
    self.urls.len()
  }

  pub fn is_empty(&self) -> bool {
    self.urls.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_against_origin() {
    let origin = Url::parse("http://localhost:8080/").unwrap();
    let manifest = Manifest::resolve(&origin, &["/", "/index.html", "/css/app.css", "/index.html"])
      .unwrap();

    let urls: Vec<&str> = manifest.urls().iter().map(Url::as_str).collect();
    assert_eq!(
      urls,
      vec![
        "http://localhost:8080/",
        "http://localhost:8080/index.html",
        "http://localhost:8080/css/app.css",
      ]
    );
  }

  #[test]
  fn test_absolute_entries_are_kept() {
    let origin = Url::parse("http://localhost:8080/").unwrap();
    let manifest = Manifest::resolve(&origin, &["https://cdn.example.com/lib.js"]).unwrap();
    assert_eq!(manifest.urls()[0].as_str(), "https://cdn.example.com/lib.js");
  }
}
