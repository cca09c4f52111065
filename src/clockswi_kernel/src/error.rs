//! Result codes and per-operation error types
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use clockswi_kernel::ResultCode;
            /// assert_eq!(ResultCode::InvalidTimeout.as_str(), "InvalidTimeout");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the kernel API can return.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified timeout is zero or exceeds
        /// [`MAX_CLOCK_TIMEOUT`](crate::MAX_CLOCK_TIMEOUT).
        InvalidTimeout = -18,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                $vname
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(ResultCode::from(*self).as_str())
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(ResultCode::from(*self).as_str())
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $( $name::$vname => Self::$vname, )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                    assert!(ResultCode::from($name::$vname).is_err());
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

define_error! {
    mod start_clock_error {}
    /// Error type for [`Clock::start`] and [`Clock::restart`].
    ///
    /// [`Clock::start`]: crate::Clock::start
    /// [`Clock::restart`]: crate::Clock::restart
    pub enum StartClockError {
        /// The timeout is zero or exceeds
        /// [`MAX_CLOCK_TIMEOUT`](crate::MAX_CLOCK_TIMEOUT).
        InvalidTimeout,
    }
}

define_error! {
    mod set_clock_timeout_error {}
    /// Error type for [`Clock::set_timeout`].
    ///
    /// [`Clock::set_timeout`]: crate::Clock::set_timeout
    pub enum SetClockTimeoutError {
        /// The timeout is zero or exceeds
        /// [`MAX_CLOCK_TIMEOUT`](crate::MAX_CLOCK_TIMEOUT).
        InvalidTimeout,
    }
}

define_error! {
    mod set_clock_period_error {}
    /// Error type for [`Clock::set_period`].
    ///
    /// [`Clock::set_period`]: crate::Clock::set_period
    pub enum SetClockPeriodError {
        /// The period exceeds [`MAX_CLOCK_TIMEOUT`](crate::MAX_CLOCK_TIMEOUT).
        BadParam,
    }
}

impl From<SetClockTimeoutError> for StartClockError {
    #[inline]
    fn from(x: SetClockTimeoutError) -> Self {
        match x {
            SetClockTimeoutError::InvalidTimeout => Self::InvalidTimeout,
        }
    }
}
