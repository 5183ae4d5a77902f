/// Features negotiated on the login stream that govern how item streams are recovered and
///  whether posting is possible.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoginFeatures {
    /// The provider recovers streams: streams closed as recoverable are re-requested instead of
    ///  being closed for the application.
    pub single_open: bool,
    /// The application accepts suspect data on open streams.
    pub allow_suspect_data: bool,
    pub supports_posting: bool,
}

impl LoginFeatures {
    pub fn new() -> LoginFeatures {
        LoginFeatures {
            single_open: true,
            allow_suspect_data: true,
            supports_posting: true,
        }
    }
}

impl Default for LoginFeatures {
    fn default() -> Self {
        LoginFeatures::new()
    }
}
