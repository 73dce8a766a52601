pub use nix::errno::Errno::{self, *};
use std::fmt::{self, Display};
use std::io::Error as IOError;
use std::result;

pub type Result<T> = result::Result<T, Error>;

/// Abstraction of the errors encountered while reading `/proc` and walking
/// the namespace hierarchy. Carries an `errno` so callers can map a failure
/// back to the value a syscall like `getpid`/`ptrace` would have produced,
/// plus an optional message and source for diagnostics.
pub struct Error {
    errno: Errno,
    msg: Option<Box<dyn Display + Send + Sync + 'static>>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

#[allow(dead_code)]
impl Error {
    /// Create an Error with an unknown errno.
    pub fn unknown() -> Self {
        Error::errno(Errno::UnknownErrno)
    }

    /// Create an Error with the specific errno.
    pub fn errno(errno: Errno) -> Self {
        Error {
            errno,
            msg: None,
            source: None,
        }
    }

    /// Create an Error with the specific message.
    pub fn msg<M>(msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error::errno_with_msg(Errno::UnknownErrno, msg)
    }

    /// Create an Error with the specific errno and message.
    pub fn errno_with_msg<M>(errno: Errno, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        Error {
            errno,
            msg: Some(Box::new(msg)),
            source: None,
        }
    }

    pub fn with_errno(mut self, errno: Errno) -> Self {
        self.errno = errno;
        self
    }

    pub fn with_msg<M>(mut self, msg: M) -> Self
    where
        M: Display + Send + Sync + 'static,
    {
        self.msg = Some(Box::new(msg));
        self
    }

    /// Errno of this Error. `UnknownErrno` if none was set.
    pub fn get_errno(&self) -> Errno {
        self.errno
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error with {}({})", self.errno, self.errno as i32)?;

        if let Some(msg) = &self.msg {
            write!(f, ", msg: {}", msg)?;
        }
        if let Some(source) = &self.source {
            write!(f, ", source: {}", source)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Error");
        d.field("errno", &self.errno);
        match self.msg.as_ref() {
            Some(msg) => d.field("msg", &Some(format_args!("{}", msg))),
            None => d.field("msg", &Option::<()>::None),
        };
        d.field("source", &self.source).finish()
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.errno == other.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Error {
        Error::errno(errno)
    }
}

impl From<IOError> for Error {
    fn from(error: IOError) -> Error {
        Error {
            errno: match error.raw_os_error() {
                Some(errno) => Errno::from_i32(errno),
                None => Errno::UnknownErrno,
            },
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(error: nix::Error) -> Error {
        Error {
            errno: match error {
                nix::Error::Sys(errno) => errno,
                _ => Errno::UnknownErrno,
            },
            msg: None,
            source: Some(Box::new(error)),
        }
    }
}

/// Attaches a message (and optionally an errno) to a `Result`, the way
/// [`anyhow::Context`] does for `anyhow::Error`.
///
/// [`anyhow::Context`]: https://docs.rs/anyhow/1.0.40/anyhow/trait.Context.html
pub trait WithContext<T> {
    fn errno(self, errno: Errno) -> Result<T>;
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;
}

impl<T, E> WithContext<T> for result::Result<T, E>
where
    Error: From<E>,
{
    fn errno(self, errno: Errno) -> Result<T> {
        self.map_err(|error| Into::<Error>::into(error).with_errno(errno))
    }

    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|error| Into::<Error>::into(error).with_msg(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_errno() {
        let err: Error = Errno::ENOENT.into();
        assert_eq!(err.get_errno(), Errno::ENOENT);
    }

    #[test]
    fn context_attaches_message() {
        let res: result::Result<(), Errno> = Err(Errno::EPERM);
        let err = res.context("reading ns/pid").unwrap_err();
        assert_eq!(err.get_errno(), Errno::UnknownErrno);
        assert_eq!(
            format!("{}", err),
            "Error with UnknownErrno(0), msg: reading ns/pid"
        );
    }

    #[test]
    fn errno_overrides_code() {
        let res: result::Result<(), std::io::Error> =
            Err(std::io::Error::from_raw_os_error(libc::EACCES));
        let err = res.errno(Errno::EPERM).unwrap_err();
        assert_eq!(err.get_errno(), Errno::EPERM);
    }
}
