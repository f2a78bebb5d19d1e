pub mod auth;

pub use auth::{
    AuthenticateRequest, RefreshTokenRequest, RevokeAllTenantTokensRequest, RevokeTokenRequest,
    RevokeTokenResponse, RevokedCountResponse, TokenPairResponse, VerifyTokenRequest,
    VerifyTokenResponse,
};
