//! Template lookup on a search path and include resolution.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::template::{Segment, Template};

/// Maximum include nesting.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Extension tried when a name is not found as given.
const TEMPLATE_EXT: &str = "tmpl";

/// Finds templates by name on an ordered list of directories.
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    search_path: Vec<PathBuf>,
}

impl TemplateLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Path of a template. Absolute names are used as given; relative names
    /// are tried in each search directory, first verbatim then with `.tmpl`.
    pub fn find(&self, name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        } else {
            for dir in &self.search_path {
                let exact = dir.join(name);
                if exact.is_file() {
                    return Ok(exact);
                }
                let with_ext = dir.join(format!("{name}.{TEMPLATE_EXT}"));
                if with_ext.is_file() {
                    return Ok(with_ext);
                }
            }
        }
        Err(RenderError::NotFound {
            name: name.to_string(),
            search_path: self.search_path.clone(),
        })
    }

    /// Load a template with every include inlined.
    pub fn load(&self, name: &str) -> Result<Template> {
        let mut stack = Vec::new();
        let segments = self.resolve(name, &mut stack)?;
        Ok(Template::from_segments(name.to_string(), segments))
    }

    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> Result<Vec<Segment>> {
        if stack.iter().any(|s| s == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(RenderError::IncludeCycle { chain });
        }
        if stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(RenderError::IncludeDepth {
                name: name.to_string(),
                limit: MAX_INCLUDE_DEPTH,
            });
        }

        let path = self.find(name)?;
        debug!(template = name, path = %path.display(), "loading template");
        let text = fs::read_to_string(&path).map_err(|e| RenderError::io(&path, e))?;
        let parsed = Template::parse(name, &text)?;

        stack.push(name.to_string());
        let mut out = Vec::new();
        for segment in parsed.into_segments() {
            match segment {
                Segment::Include(include) => out.extend(self.resolve(&include, stack)?),
                other => out.push(other),
            }
        }
        stack.pop();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{BindingSource, Bindings};

    #[test]
    fn includes_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.i"), "Nickname $nick\n").unwrap();
        fs::write(
            dir.path().join("relay.tmpl"),
            "${include:common.i}OrPort $orport\n",
        )
        .unwrap();

        let loader = TemplateLoader::new(vec![dir.path().to_path_buf()]);
        let t = loader.load("relay").unwrap();
        assert!(t.includes().next().is_none());

        let mut b = Bindings::new();
        b.set(BindingSource::Node, "nick", "test001r");
        b.set(BindingSource::Node, "orport", "5001");
        assert_eq!(
            t.render(&b, "test001r").unwrap(),
            "Nickname test001r\nOrPort 5001\n"
        );
    }

    #[test]
    fn later_search_dirs_are_fallbacks() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("client.tmpl"), "x").unwrap();
        fs::write(first.path().join("client.tmpl"), "y").unwrap();

        let loader = TemplateLoader::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(loader.find("client").unwrap(), first.path().join("client.tmpl"));
    }

    #[test]
    fn include_cycles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "${include:b}").unwrap();
        fs::write(dir.path().join("b"), "${include:a}").unwrap();

        let loader = TemplateLoader::new(vec![dir.path().to_path_buf()]);
        match loader.load("a") {
            Err(RenderError::IncludeCycle { chain }) => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_template_lists_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TemplateLoader::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            loader.load("nope"),
            Err(RenderError::NotFound { .. })
        ));
    }
}
