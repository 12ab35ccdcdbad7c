mod episodes;
mod podcasts;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Enclosure, Episode, EpisodeKeys, NewEpisode, NewPodcast, Owner, Podcast,
    PodcastKeys, PodcastUpdate,
};
