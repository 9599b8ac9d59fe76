use crate::dispatcher::Dispatcher;
use log::trace;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HsuError {
    #[error("the setuid helper is missing: {0}")]
    Missing(PathBuf),
    #[error("current user is not in the rsurc file")]
    Denied,
    #[error("invalid user id {0:?} from the setuid helper")]
    Invalid(String),
    #[error("cannot obtain user id from the setuid helper: {0}")]
    Failed(String),
}

/** Probes the setuid helper for the caller's user id, at most once per
 * process. Concurrent callers wait for the same probe.
 */
pub struct Hsu {
    path: PathBuf,
    id: OnceLock<Result<u32, HsuError>>,
}

impl Hsu {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            id: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn id(&self, d: &dyn Dispatcher) -> Result<u32, HsuError> {
        self.id.get_or_init(|| self.probe(d)).clone()
    }

    fn probe(&self, d: &dyn Dispatcher) -> Result<u32, HsuError> {
        trace!("Probing setuid helper {}", self.path.display());
        let output = d.helper_output(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                HsuError::Missing(self.path.clone())
            } else {
                HsuError::Failed(e.to_string())
            }
        })?;

        match output.status.code() {
            Some(0) => (),
            Some(1) => return Err(HsuError::Denied),
            _ => return Err(HsuError::Failed(output.status.to_string())),
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<u32>()
            .map_err(|_| HsuError::Invalid(stdout.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use rstest::*;
    use std::sync::Arc;

    #[rstest]
    #[case(Ok((0, "9\n")), Ok(9))]
    #[case(Ok((1, "")), Err(HsuError::Denied))]
    #[case(Ok((0, "nine")), Err(HsuError::Invalid("nine".into())))]
    #[case(Err(io::ErrorKind::NotFound), Err(HsuError::Missing("/usr/libexec/rampart/rsu".into())))]
    fn test_hsu_probe(
        #[case] helper: Result<(i32, &str), io::ErrorKind>,
        #[case] want: Result<u32, HsuError>,
    ) {
        let mut d = Recorder::default();
        d.helper = helper.map(|(code, out)| (code, out.to_string()));
        let hsu = Hsu::new("/usr/libexec/rampart/rsu".into());
        assert_eq!(hsu.id(&d), want);
    }

    #[test]
    fn test_hsu_probes_once() {
        let mut d = Recorder::default();
        d.helper = Ok((0, "3".into()));
        let d = Arc::new(d);
        let hsu = Arc::new(Hsu::new("/usr/libexec/rampart/rsu".into()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = d.clone();
                let hsu = hsu.clone();
                std::thread::spawn(move || hsu.id(&*d))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().ok(), Some(Ok(3)));
        }
        assert_eq!(d.calls_matching("helper_output"), 1);
    }
}
