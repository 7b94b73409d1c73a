pub mod readpb;
pub mod run;
pub mod stepping;
