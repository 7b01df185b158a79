use std::{
    fs::File,
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use crate::{
    config::StoreConfig,
    error::{Error, Result},
    graph::{ExtensionField, Revision, RevisionGraph},
    revision_id::RevisionId,
    scanner::quote,
};

fn write_extension_fields(sink: &mut impl Write, fields: &[ExtensionField]) -> Result<()> {
    for field in fields {
        sink.write_all(field.key.as_bytes())?;
        if !field.value.is_empty() {
            sink.write_all(b"\t")?;
            sink.write_all(&field.value)?;
        }
        sink.write_all(b";\n")?;
    }
    Ok(())
}

fn write_admin(sink: &mut impl Write, revision: &Revision) -> Result<()> {
    write!(
        sink,
        "\n{}\ndate\t{};\tauthor {};\tstate {};\nbranches",
        revision.id, revision.date, revision.author, revision.state
    )?;
    for branch in &revision.branches {
        write!(sink, "\n\t{}", branch)?;
    }
    sink.write_all(b";\nnext\t")?;
    if let Some(next) = &revision.next {
        write!(sink, "{}", next)?;
    }
    sink.write_all(b";\n")?;
    if !revision.hardlinks.is_empty() {
        sink.write_all(b"hardlinks\t")?;
        let names: Vec<Vec<u8>> = revision
            .hardlinks
            .iter()
            .map(|name| quote(name.as_bytes()))
            .collect();
        sink.write_all(&names.join(&b' '))?;
        sink.write_all(b";\n")?;
    }
    write_extension_fields(sink, &revision.extension_fields)
}

/// `,name,` next to `path`.
fn temp_path(path: &Path, config: &StoreConfig) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}{}", config.temp_prefix, name, config.temp_suffix))
}

impl RevisionGraph {
    fn write_header(&self, sink: &mut impl Write) -> Result<()> {
        sink.write_all(b"head\t")?;
        if let Some(head) = &self.head {
            write!(sink, "{}", head)?;
        }
        sink.write_all(b";\n")?;
        if let Some(branch) = &self.default_branch {
            writeln!(sink, "branch\t{};", branch)?;
        }
        sink.write_all(b"access")?;
        for user in &self.access {
            write!(sink, "\n\t{}", user)?;
        }
        sink.write_all(b";\nsymbols")?;
        for symbol in self.symbols.iter() {
            write!(sink, "\n\t{}:{}", symbol.tag, symbol.revision)?;
        }
        sink.write_all(b";\nlocks")?;
        for lock in self.locks.iter() {
            write!(sink, "\n\t{}:{}", lock.user, lock.revision)?;
        }
        sink.write_all(b";")?;
        if self.strict_locks {
            sink.write_all(b" strict;")?;
        }
        sink.write_all(b"\n")?;
        if let Some(comment) = &self.comment_leader {
            sink.write_all(b"comment\t")?;
            sink.write_all(&quote(comment))?;
            sink.write_all(b";\n")?;
        }
        if let Some(mode) = &self.expansion {
            writeln!(sink, "expand\t@{}@;", mode)?;
        }
        write_extension_fields(sink, &self.extension_fields)?;
        sink.write_all(b"\n")?;
        Ok(())
    }

    /// Admin blocks in file order: each revision, then everything further
    /// along its chain, then its branches in ascending order.
    fn write_tree(&self, sink: &mut impl Write) -> Result<()> {
        let mut pending: Vec<RevisionId> = self.head.iter().cloned().collect();
        while let Some(id) = pending.pop() {
            let revision = match self.revision(&id) {
                Some(revision) => revision,
                None => continue,
            };
            write_admin(sink, revision)?;
            pending.extend(revision.branches.iter().rev().cloned());
            pending.extend(revision.next.iter().cloned());
        }
        Ok(())
    }

    /// Serializes the whole file.
    pub fn write_to(&self, sink: &mut impl Write) -> Result<()> {
        self.write_header(sink)?;
        self.write_tree(sink)?;
        sink.write_all(b"\n\ndesc\n")?;
        sink.write_all(&quote(&self.description))?;

        let texts = match (self.texts.get(), &self.source) {
            (None, Some(source)) => {
                // never fetched, so nothing after desc can have changed
                sink.write_all(&source.bytes[source.delta_pos..])?;
                return Ok(());
            }
            _ => self.change_texts()?,
        };
        for (id, text) in texts.iter() {
            if self.revision(id).is_none() {
                continue;
            }
            write!(sink, "\n\n\n{}\nlog\n", id)?;
            sink.write_all(&quote(&text.log))?;
            for field in &text.extension_fields {
                sink.write_all(b"\n")?;
                sink.write_all(field.key.as_bytes())?;
                if !field.value.is_empty() {
                    sink.write_all(b"\t")?;
                    sink.write_all(&field.value)?;
                }
                sink.write_all(b";")?;
            }
            sink.write_all(b"\ntext\n")?;
            sink.write_all(&quote(&text.text))?;
        }
        sink.write_all(&texts.trailer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn rewrite(&self, path: impl AsRef<Path>) -> Result<()> {
        self.rewrite_with(path, &StoreConfig::default())
    }

    /// Replaces the file at `path` with this graph. The new contents go to
    /// a temporary sibling first, which must not already exist, and are then
    /// renamed over `path`.
    pub fn rewrite_with(&self, path: impl AsRef<Path>, config: &StoreConfig) -> Result<()> {
        let path = path.as_ref();
        let temp = temp_path(path, config);
        let file = match File::options().write(true).create_new(true).open(&temp) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::WriteConflict(temp.display().to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let written = (|| -> Result<()> {
            let mut sink = BufWriter::new(file);
            self.write_to(&mut sink)?;
            let file = sink.into_inner().map_err(|err| err.into_error())?;
            file.sync_all()?;
            std::fs::rename(&temp, path)?;
            Ok(())
        })();
        if let Err(err) = written {
            let _ = std::fs::remove_file(&temp);
            return Err(err);
        }
        log::info!("rewrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        checkin::CheckinOptions,
        outdate::Bounds,
        parse::SAMPLE,
    };

    fn rev(s: &str) -> RevisionId {
        s.parse().unwrap()
    }

    #[test]
    fn test_sample_is_canonical() {
        let graph = RevisionGraph::parse(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(String::from_utf8(graph.to_bytes().unwrap()).unwrap(), SAMPLE);
        graph.change_texts().unwrap();
        assert_eq!(String::from_utf8(graph.to_bytes().unwrap()).unwrap(), SAMPLE);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut graph = RevisionGraph::parse(SAMPLE.as_bytes().to_vec()).unwrap();
        graph
            .checkin(None, b"a\nY\nc\n", "third", &CheckinOptions::new("alice"))
            .unwrap();
        let once = graph.to_bytes().unwrap();
        let twice = RevisionGraph::parse(once.clone()).unwrap().to_bytes().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_new_graph_layout() {
        let mut graph = RevisionGraph::new();
        let options = CheckinOptions {
            date: Some(String::from("2024.01.02.03.04.05")),
            ..CheckinOptions::new("alice")
        };
        graph.checkin(None, b"a\n", "initial\n", &options).unwrap();
        assert_eq!(
            String::from_utf8(graph.to_bytes().unwrap()).unwrap(),
            "head\t1.1;\naccess;\nsymbols;\nlocks;\n\n\
             \n1.1\ndate\t2024.01.02.03.04.05;\tauthor alice;\tstate Exp;\nbranches;\nnext\t;\n\
             \n\ndesc\n@@\
             \n\n\n1.1\nlog\n@initial\n@\ntext\n@a\n@\n"
        );
    }

    #[test]
    fn test_outdated_revisions_are_dropped() {
        let mut graph = RevisionGraph::new();
        let options = CheckinOptions::new("alice");
        for content in ["a\n", "b\n", "c\n"] {
            graph.checkin(None, content.as_bytes(), "m", &options).unwrap();
        }
        graph
            .delete_range(&rev("1.2"), &rev("1.2"), Bounds::Inclusive)
            .unwrap();
        let reread = RevisionGraph::parse(graph.to_bytes().unwrap()).unwrap();
        assert!(!reread.contains(&rev("1.2")));
        assert_eq!(reread.reconstruct(&rev("1.1")).unwrap(), b"a\n".to_vec());
        assert_eq!(reread.change_texts().unwrap().len(), 2);
    }

    #[test]
    fn test_rewrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file,v");
        std::fs::write(&path, SAMPLE).unwrap();
        let mut graph = RevisionGraph::open(&path).unwrap();
        graph.set_tag("REL2", &rev("1.1")).unwrap();
        graph.rewrite(&path).unwrap();

        let reread = RevisionGraph::open(&path).unwrap();
        assert_eq!(reread.resolve("REL2").unwrap(), rev("1.1"));
        assert_eq!(reread.reconstruct(&rev("1.1")).unwrap(), b"a\nb\nc\n".to_vec());
        assert!(!dir.path().join(",file,v,").exists());
    }

    #[test]
    fn test_existing_temp_file_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file,v");
        std::fs::write(&path, SAMPLE).unwrap();
        std::fs::write(dir.path().join(",file,v,"), b"busy").unwrap();
        let graph = RevisionGraph::open(&path).unwrap();
        assert!(matches!(graph.rewrite(&path), Err(Error::WriteConflict(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE);
        assert_eq!(std::fs::read(dir.path().join(",file,v,")).unwrap(), b"busy".to_vec());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory cannot be replaced by a file
        let path = dir.path().join("file,v");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inside"), b"x").unwrap();
        let graph = RevisionGraph::parse(SAMPLE.as_bytes().to_vec()).unwrap();
        assert!(matches!(graph.rewrite(&path), Err(Error::IO(_))));
        assert!(!dir.path().join(",file,v,").exists());
        assert!(path.join("inside").exists());
    }

    fn line() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(|s| format!("{}\n", s))
    }

    fn content() -> impl Strategy<Value = String> {
        (prop::collection::vec(line(), 0..8), any::<bool>()).prop_map(|(lines, cut)| {
            let mut text = lines.concat();
            if cut && text.ends_with('\n') {
                text.pop();
            }
            text
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            commits in prop::collection::vec((content(), any::<bool>()), 1..10)
        ) {
            let mut graph = RevisionGraph::new();
            let options = CheckinOptions::new("alice");
            let mut expected = Vec::new();
            for (i, (text, on_branch)) in commits.iter().enumerate() {
                let target = if *on_branch && i > 0 { Some(rev("1.1.1")) } else { None };
                let id = graph
                    .checkin(target.as_ref(), text.as_bytes(), "m", &options)
                    .unwrap();
                expected.push((id, text.clone()));
            }
            let bytes = graph.to_bytes().unwrap();
            let reread = RevisionGraph::parse(bytes.clone()).unwrap();
            for (id, text) in &expected {
                prop_assert_eq!(reread.reconstruct(id).unwrap(), text.as_bytes().to_vec());
            }
            prop_assert_eq!(reread.to_bytes().unwrap(), bytes);
        }
    }
}
