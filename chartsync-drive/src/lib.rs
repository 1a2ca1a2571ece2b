mod client;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList,
};
